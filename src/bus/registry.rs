//! # Receiver registry: message type → modules that handle it.
//!
//! Written during registration, read on every send. Guarded by one
//! `RwLock` that is never held across an await or a delivery.
//!
//! ## Rules
//! - At most one entry per (message type, module name).
//! - Receivers keep registration order.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use crate::error::RegistrationError;
use crate::module::ModuleHandle;

/// How a receiver consumes the type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    Cast,
    Rpc,
}

struct Receiver {
    handle: ModuleHandle,
    kind: Kind,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<HashMap<TypeId, Vec<Receiver>>>,
}

impl Registry {
    pub(crate) fn insert(
        &self,
        tag: TypeId,
        message: &'static str,
        handle: ModuleHandle,
        kind: Kind,
    ) -> Result<(), RegistrationError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let receivers = entries.entry(tag).or_default();
        if receivers.iter().any(|r| r.handle.name() == handle.name()) {
            return Err(RegistrationError::DuplicateHandler {
                module: handle.name().to_string(),
                message,
            });
        }
        receivers.push(Receiver { handle, kind });
        Ok(())
    }

    /// Receivers of `tag` consuming it as `kind`, optionally restricted to one module.
    pub(crate) fn lookup(&self, tag: TypeId, kind: Kind, only: Option<&str>) -> Vec<ModuleHandle> {
        self.read()
            .get(&tag)
            .map(|receivers| {
                receivers
                    .iter()
                    .filter(|r| r.kind == kind)
                    .filter(|r| only.is_none_or(|name| r.handle.name() == name))
                    .map(|r| r.handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn names(&self, tag: TypeId) -> Vec<String> {
        self.read()
            .get(&tag)
            .map(|receivers| {
                receivers
                    .iter()
                    .map(|r| r.handle.name().to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TypeId, Vec<Receiver>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }
}
