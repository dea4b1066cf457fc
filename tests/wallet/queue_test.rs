//! Tests for deferred calls: owner confirmation, replies and reclaim.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use proxy_wallet::codec::{self, ValueType};
use proxy_wallet::registry::Interface;
use proxy_wallet::target::{Target, TargetFailure, TargetRequest};
use proxy_wallet::types::{
    CallArgs, CallKind, CallResult, Method, Principal, ProxyTargets, TargetEntry,
};
use proxy_wallet::wallet::queue::{hash_call, Resolution};
use proxy_wallet::wallet::{Wallet, WalletError};

use crate::support::{fixture, ping_args, text_reply, Fixture, START};

async fn defer_key_call(fx: &Fixture, text: &str) -> String {
    let err = fx
        .wallet
        .proxy_call(&fx.agent, fx.call("test_call_key", text))
        .await
        .expect_err("key op is deferred");
    err.pending_hash().expect("pending hash").to_owned()
}

async fn keyed_fixture() -> Fixture {
    let fx = fixture();
    fx.grant_agent(fx.grant_only(&[("test_call", false), ("test_call_key", true)]))
        .await;
    fx
}

#[test]
fn hash_depends_on_every_input() {
    let user = Principal::from_text("agent");
    let payload = CallArgs {
        target: Principal::from_text("t"),
        method_name: "m".to_owned(),
        args: b"[]".to_vec(),
        cycles: 0,
    };
    let base = hash_call(&user, &payload, START, 1);
    assert_eq!(base, hash_call(&user, &payload, START, 1));
    assert_ne!(base, hash_call(&user, &payload, START + 1, 1));
    assert_ne!(base, hash_call(&user, &payload, START, 2));
    assert_ne!(base, hash_call(&Principal::from_text("other"), &payload, START, 1));

    let mut other_method = payload.clone();
    other_method.method_name = "n".to_owned();
    assert_ne!(base, hash_call(&user, &other_method, START, 1));
}

#[tokio::test]
async fn approved_call_matches_direct_call() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "approve me").await;

    let resolution = fx
        .wallet
        .owner_confirm(&fx.owner, &hash, true)
        .await
        .expect("owner confirms");
    let direct = fx
        .wallet
        .proxy_call(&fx.owner, fx.call("test_call_key", "approve me"))
        .await
        .expect("owner calls directly");

    match &resolution {
        Resolution::Approved(Ok(result)) => assert_eq!(result.reply, direct.reply),
        other => panic!("expected approval, got {other:?}"),
    }
    assert_eq!(direct.reply, text_reply("value"));

    let reply = fx
        .wallet
        .get_queue_reply(&fx.agent, &hash)
        .await
        .expect("agent polls");
    assert_eq!(reply, Some(resolution));
}

#[tokio::test]
async fn rejected_call_never_reaches_target() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "reject me").await;

    let resolution = fx
        .wallet
        .owner_confirm(&fx.owner, &hash, false)
        .await
        .expect("owner rejects");
    assert!(matches!(resolution, Resolution::Rejected(_)));
    assert_eq!(fx.sample.call_count(), 0);

    let reply = fx
        .wallet
        .get_queue_reply(&fx.agent, &hash)
        .await
        .expect("agent polls");
    assert_eq!(reply, Some(resolution));
}

#[tokio::test]
async fn second_confirmation_returns_first_resolution() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "once").await;

    let first = fx
        .wallet
        .owner_confirm(&fx.owner, &hash, true)
        .await
        .expect("approve");
    let second = fx
        .wallet
        .owner_confirm(&fx.owner, &hash, false)
        .await
        .expect("late reject");
    assert_eq!(first, second);
    assert_eq!(fx.sample.call_count(), 1, "executed exactly once");
}

#[tokio::test]
async fn unknown_hash_confirms_as_not_found() {
    let fx = keyed_fixture().await;
    let resolution = fx
        .wallet
        .owner_confirm(&fx.owner, "deadbeef", true)
        .await
        .expect("owner confirms");
    assert_eq!(resolution, Resolution::NotFound);
    assert_eq!(
        fx.wallet.get_queue_reply(&fx.agent, "deadbeef").await,
        Ok(None)
    );
}

#[tokio::test]
async fn confirmation_is_owner_only() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "mine").await;

    let err = fx
        .wallet
        .owner_confirm(&fx.agent, &hash, true)
        .await
        .expect_err("agent cannot approve its own call");
    assert_eq!(err, WalletError::NotOwner(fx.agent.clone()));
    assert_eq!(fx.sample.call_count(), 0);
}

#[tokio::test]
async fn approving_after_blacklisting_rejects() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "late").await;
    fx.wallet
        .add_proxy_black_list(&fx.owner, fx.agent.clone())
        .await
        .expect("blacklist");

    let resolution = fx
        .wallet
        .owner_confirm(&fx.owner, &hash, true)
        .await
        .expect("owner confirms");
    assert_eq!(
        resolution,
        Resolution::Rejected("agent is in proxy black list".to_owned())
    );
    assert_eq!(fx.sample.call_count(), 0);
}

#[tokio::test]
async fn reclaim_is_safe_to_repeat() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "reclaim").await;
    fx.wallet
        .owner_confirm(&fx.owner, &hash, true)
        .await
        .expect("approve");

    assert_eq!(fx.wallet.has_queue_method(&fx.agent, &hash).await, Ok(true));
    assert_eq!(fx.wallet.remove_queue_method(&fx.agent, &hash).await, Ok(true));
    assert_eq!(fx.wallet.remove_queue_method(&fx.agent, &hash).await, Ok(false));
    assert_eq!(fx.wallet.has_queue_method(&fx.agent, &hash).await, Ok(false));
    assert_eq!(fx.wallet.get_queue_reply(&fx.agent, &hash).await, Ok(None));
}

#[tokio::test]
async fn only_originator_or_owner_reclaims() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "mine").await;
    let other = Principal::from_text("other");
    fx.wallet
        .add_expiry_user(&fx.owner, other.clone(), fx.grant_all())
        .await
        .expect("grant other");

    assert_eq!(
        fx.wallet.remove_queue_method(&other, &hash).await,
        Err(WalletError::NotAuthorizedExecution)
    );
    assert_eq!(fx.wallet.remove_queue_method(&fx.owner, &hash).await, Ok(true));
}

#[tokio::test]
async fn queue_reads_require_owner_or_grant() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "secret").await;
    let stranger = Principal::from_text("stranger");

    let err = fx
        .wallet
        .get_queue_reply(&stranger, &hash)
        .await
        .expect_err("stranger cannot poll");
    assert!(matches!(err, WalletError::Unauthorized(_)));
    assert_eq!(
        fx.wallet.get_queue_reply(&fx.owner, &hash).await,
        Ok(Some(Resolution::NotFound))
    );
}

#[tokio::test]
async fn unconfirmed_lists_pending_calls_per_user() {
    let fx = keyed_fixture().await;
    let first = defer_key_call(&fx, "one").await;
    fx.clock.advance(10);
    let second = defer_key_call(&fx, "two").await;
    fx.wallet
        .owner_confirm(&fx.owner, &first, false)
        .await
        .expect("reject first");

    let pending = fx
        .wallet
        .get_queue_unconfirmed(&fx.owner, &fx.agent)
        .await
        .expect("owner lists");
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].hash, second);
    assert_eq!(pending[0].user, fx.agent);
    assert_eq!(pending[0].created_at, START + 10);

    assert_eq!(
        fx.wallet.get_queue_unconfirmed(&fx.agent, &fx.agent).await,
        Err(WalletError::NotOwner(fx.agent.clone()))
    );
}

#[tokio::test]
async fn approved_call_uses_interface_at_approval_time() {
    let fx = keyed_fixture().await;
    let hash = defer_key_call(&fx, "vanishing target").await;
    fx.targets.unregister(&fx.target);

    let resolution = fx
        .wallet
        .owner_confirm(&fx.owner, &hash, true)
        .await
        .expect("owner confirms");
    match resolution {
        Resolution::Approved(Err(message)) => {
            assert_eq!(message, "target test-target is not registered");
        }
        other => panic!("expected failed approval, got {other:?}"),
    }
}

#[tokio::test]
async fn end_to_end_grant_defer_approve_reclaim_blacklist() {
    let fx = keyed_fixture().await;

    fx.wallet
        .proxy_call(&fx.agent, fx.call("test_call", "plain"))
        .await
        .expect("plain call dispatches");

    let hash = defer_key_call(&fx, "key").await;
    assert_eq!(fx.wallet.get_queue_reply(&fx.agent, &hash).await, Ok(Some(Resolution::NotFound)));
    let approved = fx
        .wallet
        .owner_confirm(&fx.owner, &hash, true)
        .await
        .expect("approve");
    assert!(matches!(approved, Resolution::Approved(Ok(_))));
    assert_eq!(fx.wallet.get_queue_reply(&fx.agent, &hash).await, Ok(Some(approved)));
    assert_eq!(fx.wallet.remove_queue_method(&fx.agent, &hash).await, Ok(true));
    assert_eq!(fx.wallet.get_queue_reply(&fx.agent, &hash).await, Ok(None));

    fx.wallet
        .add_proxy_black_list(&fx.owner, fx.agent.clone())
        .await
        .expect("blacklist");
    let err = fx
        .wallet
        .proxy_call(&fx.agent, fx.call("test_call", "blocked"))
        .await
        .expect_err("blacklisted");
    assert!(matches!(err, WalletError::Unauthorized(_)));
    assert_eq!(fx.sample.call_count(), 2);
}

/// Target that calls back into the wallet while it runs.
struct ReentrantTarget {
    wallet: OnceLock<Arc<Wallet>>,
    hash: OnceLock<String>,
    owner: Principal,
    seen: Mutex<Vec<Resolution>>,
}

impl ReentrantTarget {
    fn reply() -> Vec<u8> {
        codec::encode(&[ValueType::Text], &[json!("pong")]).expect("encode")
    }
}

#[async_trait]
impl Target for ReentrantTarget {
    fn interface(&self) -> Interface {
        Interface::new().function("ping", vec![ValueType::Text], vec![ValueType::Text], None)
    }

    async fn call(&self, _request: TargetRequest) -> Result<Vec<u8>, TargetFailure> {
        let wallet = self.wallet.get().expect("wallet wired");
        let hash = self.hash.get().expect("hash wired");
        let again = wallet
            .owner_confirm(&self.owner, hash, true)
            .await
            .expect("owner confirms from inside the target");
        self.seen.lock().expect("seen lock").push(again);
        wallet.balance_get(&self.owner).await.expect("balance readable");
        Ok(Self::reply())
    }
}

#[tokio::test]
async fn approved_call_runs_without_the_wallet_lock() {
    let fx = fixture();
    let principal = Principal::from_text("reentrant");
    let target = Arc::new(ReentrantTarget {
        wallet: OnceLock::new(),
        hash: OnceLock::new(),
        owner: fx.owner.clone(),
        seen: Mutex::new(Vec::new()),
    });
    fx.targets.register(principal.clone(), target.clone());
    fx.grant_agent(ProxyTargets {
        targets: vec![TargetEntry {
            target: principal.clone(),
            methods: vec![Method::new("ping", CallKind::Call).key()],
        }],
        expiration: None,
    })
    .await;

    let err = fx
        .wallet
        .proxy_call(
            &fx.agent,
            CallArgs {
                target: principal,
                method_name: "ping".to_owned(),
                args: ping_args("hello"),
                cycles: 0,
            },
        )
        .await
        .expect_err("key op is deferred");
    let hash = err.pending_hash().expect("pending hash").to_owned();
    target.wallet.set(Arc::clone(&fx.wallet)).expect("set once");
    target.hash.set(hash.clone()).expect("set once");

    let resolution = tokio::time::timeout(
        Duration::from_secs(5),
        fx.wallet.owner_confirm(&fx.owner, &hash, true),
    )
    .await
    .expect("confirmation must not deadlock")
    .expect("owner confirms");

    assert_eq!(
        resolution,
        Resolution::Approved(Ok(CallResult {
            reply: ReentrantTarget::reply(),
        }))
    );
    // The nested confirmation saw the call in flight and did not run it again.
    assert_eq!(
        *target.seen.lock().expect("seen lock"),
        vec![Resolution::NotFound]
    );
    assert_eq!(
        fx.wallet.get_queue_reply(&fx.agent, &hash).await,
        Ok(Some(resolution))
    );
    assert!(
        fx.wallet
            .get_queue_unconfirmed(&fx.owner, &fx.agent)
            .await
            .expect("owner lists")
            .is_empty()
    );
}
