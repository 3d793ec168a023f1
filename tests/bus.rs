mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use modvisor::{CastOptions, Context, RegistrationError, Responder, RpcError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use common::{eventually, server};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Deposit {
    player: u64,
    amount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Balance(i64);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tick(u32);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Unhandled;

#[derive(Default)]
struct Bank {
    balance: i64,
}

fn deposit(bank: &mut Bank, req: Deposit, responder: Responder, _: &Context<Bank>) {
    if req.amount < 0 {
        responder.reject(format!("negative deposit for {}", req.player));
        return;
    }
    bank.balance += req.amount;
    responder.resolve(Balance(bank.balance));
}

#[tokio::test]
async fn request_resolves_with_the_handler_response() {
    let mut server = server(1, "game");
    let mut bank = server.module("bank", Bank::default());
    server.bus().register_rpc(&mut bank, deposit).unwrap();
    server.mount(bank).unwrap();
    server.start().await.unwrap();

    for (amount, expected) in [(10, 10), (15, 25)] {
        let balance: Balance = server
            .bus()
            .call(Deposit { player: 7, amount }, CastOptions::new())
            .await
            .unwrap();
        assert_eq!(balance, Balance(expected));
    }

    let err = server
        .bus()
        .call::<_, Balance>(Deposit { player: 7, amount: -1 }, CastOptions::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RpcError::Rejected {
            message: "negative deposit for 7".into()
        }
    );

    assert!(server.shutdown().await);
}

#[tokio::test]
async fn dropped_responder_is_a_broken_promise() {
    let mut server = server(1, "game");
    let mut bank = server.module("bank", ());
    server
        .bus()
        .register_rpc(&mut bank, |_, _: Deposit, _: Responder, _| {})
        .unwrap();
    server.mount(bank).unwrap();
    server.start().await.unwrap();

    let err = server
        .bus()
        .call::<_, Balance>(Deposit { player: 1, amount: 1 }, CastOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::BrokenPromise);

    assert!(server.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn unanswered_request_times_out_exactly_once() {
    let mut server = server(1, "game");
    let mut bank = server.module("bank", Vec::<Responder>::new());
    server
        .bus()
        .register_rpc(&mut bank, |held: &mut Vec<Responder>, _: Deposit, responder, _| {
            held.push(responder)
        })
        .unwrap();
    server
        .bus()
        .register_handler(&mut bank, |held: &mut Vec<Responder>, _: &Tick, _| {
            for responder in held.drain(..) {
                responder.resolve(Balance(0));
            }
        })
        .unwrap();
    server.mount(bank).unwrap();
    server.start().await.unwrap();

    let started = tokio::time::Instant::now();
    let err = server
        .bus()
        .call::<_, Balance>(Deposit { player: 1, amount: 1 }, CastOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(500));

    // A late answer finds nobody waiting and changes nothing.
    server.bus().cast(Tick(0), CastOptions::new());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(server.shutdown().await);
}

#[tokio::test]
async fn request_without_receiver_fails_fast() {
    let mut server = server(1, "game");
    server.start().await.unwrap();

    let err = server
        .bus()
        .call::<_, Balance>(Unhandled, CastOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NoReceiver { .. }));

    let err = server
        .bus()
        .call::<_, Balance>(Unhandled, CastOptions::new().server_id(9))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Transport { .. }));

    assert!(server.shutdown().await);
}

#[test]
fn duplicate_handler_registration_is_fatal() {
    let server = server(1, "game");
    let mut module = server.module("bank", Bank::default());
    server.bus().register_rpc(&mut module, deposit).unwrap();

    let err = server.bus().register_rpc(&mut module, deposit).unwrap_err();
    assert!(matches!(err, RegistrationError::DuplicateHandler { .. }));
    let err = server
        .bus()
        .register_handler(&mut module, |_, _: &Deposit, _| {})
        .unwrap_err();
    assert_eq!(err.as_label(), "registration_duplicate_handler");
}

#[test]
fn refused_registration_leaves_no_handler_behind() {
    let server = server(1, "game");
    let mut first = server.module("bank", Bank::default());
    server.bus().register_rpc(&mut first, deposit).unwrap();

    // Same module name: the module accepts the handler, the bus refuses it.
    let mut second = server.module("bank", Bank::default());
    let err = server.bus().register_rpc(&mut second, deposit).unwrap_err();
    assert!(matches!(err, RegistrationError::DuplicateHandler { .. }));
    assert!(!second.handles::<Deposit>());

    server
        .bus()
        .register_handler(&mut first, |_, _: &Tick, _| {})
        .unwrap();
    let err = server
        .bus()
        .register_handler(&mut second, |_, _: &Tick, _| {})
        .unwrap_err();
    assert_eq!(err.as_label(), "registration_duplicate_handler");
    assert!(!second.handles::<Tick>());
    assert!(first.handles::<Tick>());
    assert_eq!(server.bus().receivers::<Deposit>(), vec!["bank".to_string()]);
}

#[tokio::test]
async fn cast_reaches_each_receiver_once_and_one_of_mods_narrows() {
    let mut server = server(1, "game");
    let seen = Arc::new(Mutex::new(Vec::new()));

    for name in ["audit", "stats"] {
        let mut module = server.module(name, ());
        let seen = seen.clone();
        server
            .bus()
            .register_handler(&mut module, move |_, tick: &Tick, ctx: &Context<()>| {
                seen.lock().unwrap().push(format!("{}:{}", ctx.name(), tick.0));
            })
            .unwrap();
        server.mount(module).unwrap();
    }
    assert_eq!(server.bus().receivers::<Tick>(), vec!["audit", "stats"]);
    server.start().await.unwrap();

    server.bus().cast(Tick(1), CastOptions::new());
    server
        .bus()
        .cast(Tick(2), CastOptions::new().one_of_mods("stats"));

    eventually(|| seen.lock().unwrap().len() == 3).await;
    let mut got = seen.lock().unwrap().clone();
    got.sort();
    assert_eq!(got, vec!["audit:1", "stats:1", "stats:2"]);

    assert!(server.shutdown().await);
}

#[tokio::test(start_paused = true)]
async fn expired_cast_is_dropped_before_dispatch() {
    let mut server = server(1, "game");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut module = server.module("stats", ());
    server
        .bus()
        .register_handler(&mut module, move |_, tick: &Tick, _| {
            let _ = tx.send(tick.0);
        })
        .unwrap();
    server.mount(module).unwrap();

    // Queued before start, so it sits in the mailbox past its deadline.
    server
        .bus()
        .cast(Tick(1), CastOptions::new().expires(Duration::from_millis(50)));
    server.bus().cast(Tick(2), CastOptions::new());
    tokio::time::sleep(Duration::from_millis(100)).await;

    server.start().await.unwrap();
    assert_eq!(rx.recv().await, Some(2));

    assert!(server.shutdown().await);
    assert!(rx.try_recv().is_err());
}

fn explode() {
    panic!("handler bug")
}

#[tokio::test]
async fn handler_panic_does_not_stop_the_actor() {
    let mut server = server(1, "game");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut module = server.module("stats", 0u32);
    server
        .bus()
        .register_handler(&mut module, move |count: &mut u32, tick: &Tick, _| {
            *count += 1;
            if tick.0 == 0 {
                explode();
            }
            let _ = tx.send(*count);
        })
        .unwrap();
    server.mount(module).unwrap();
    server.start().await.unwrap();

    server.bus().cast(Tick(0), CastOptions::new());
    server.bus().cast(Tick(1), CastOptions::new());
    assert_eq!(rx.recv().await, Some(2));

    assert!(server.shutdown().await);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Load(String);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_async_delivers_the_result_on_the_actor() {
    let mut server = server(1, "game");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut module = server.module("loader", Vec::<String>::new());
    server
        .bus()
        .register_handler(&mut module, move |_: &mut Vec<String>, load: &Load, ctx: &Context<Vec<String>>| {
            let key = load.0.clone();
            let tx = tx.clone();
            ctx.run_async(
                move || {
                    if key.is_empty() {
                        return Err("empty key".to_string());
                    }
                    Ok(format!("row:{key}"))
                },
                move |loaded: &mut Vec<String>, result: Result<String, String>, _| {
                    loaded.push(result.unwrap_or_else(|err| err));
                    let _ = tx.send(loaded.clone());
                },
            );
        })
        .unwrap();
    server.mount(module).unwrap();
    server.start().await.unwrap();

    server.bus().cast(Load("42".into()), CastOptions::new());
    assert_eq!(rx.recv().await.unwrap(), vec!["row:42"]);
    server.bus().cast(Load(String::new()), CastOptions::new());
    assert_eq!(rx.recv().await.unwrap(), vec!["row:42", "empty key"]);

    assert!(server.shutdown().await);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settle(i64);

type Ledger = Vec<Result<i64, String>>;

#[tokio::test]
async fn module_request_callback_runs_on_the_caller() {
    let mut server = server(1, "game");
    let mut bank = server.module("bank", Bank::default());
    server.bus().register_rpc(&mut bank, deposit).unwrap();
    server.mount(bank).unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut player = server.module("player", Ledger::new());
    server
        .bus()
        .register_handler(&mut player, move |_, settle: &Settle, ctx: &Context<Ledger>| {
            let tx = tx.clone();
            ctx.request(
                Deposit {
                    player: 3,
                    amount: settle.0,
                },
                CastOptions::new().one_of_mods("bank"),
                move |log: &mut Ledger, result: Result<Balance, RpcError>, _| {
                    log.push(result.map(|b| b.0).map_err(|e| e.as_label().to_string()));
                    let _ = tx.send(log.clone());
                },
            );
        })
        .unwrap();
    server.mount(player).unwrap();
    server.start().await.unwrap();

    server.bus().cast(Settle(5), CastOptions::new());
    assert_eq!(rx.recv().await.unwrap(), vec![Ok(5)]);
    server.bus().cast(Settle(-5), CastOptions::new());
    assert_eq!(
        rx.recv().await.unwrap(),
        vec![Ok(5), Err("rpc_rejected".to_string())]
    );

    assert!(server.shutdown().await);
}
