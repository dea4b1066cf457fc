//! Tests for grants, lazy expiry and the authorization store.

use proxy_wallet::types::{CallKind, Method, Principal, ProxyTargets, TargetEntry, ValidationMode};
use proxy_wallet::wallet::store::{AccessCheck, AuthorizationStore, DEFAULT_EXPIRY_PERIOD};
use proxy_wallet::wallet::WalletError;

use crate::support::{fixture, fixture_with, HOUR, START};

fn entry(target: &str, methods: Vec<Method>) -> ProxyTargets {
    ProxyTargets {
        targets: vec![TargetEntry {
            target: Principal::from_text(target),
            methods,
        }],
        expiration: None,
    }
}

#[test]
fn grant_uses_default_period() {
    let mut store = AuthorizationStore::default();
    let grant = store
        .add_expiry_user(
            Principal::from_text("agent"),
            entry("t", vec![Method::new("foo", CallKind::Call)]),
            START,
        )
        .expect("grant should succeed");

    assert_eq!(grant.granted_at, START);
    assert_eq!(grant.expires_at, START + DEFAULT_EXPIRY_PERIOD);
}

#[test]
fn explicit_expiration_is_a_period_from_now() {
    let mut store = AuthorizationStore::default();
    let mut request = entry("t", vec![Method::new("foo", CallKind::Call)]);
    request.expiration = Some(HOUR);

    let grant = store
        .add_expiry_user(Principal::from_text("agent"), request, START)
        .expect("grant should succeed");
    assert_eq!(grant.expires_at, START + HOUR);
}

#[test]
fn zero_period_grant_is_rejected() {
    let mut store = AuthorizationStore::default();
    let mut request = entry("t", vec![Method::new("foo", CallKind::Call)]);
    request.expiration = Some(0);

    let err = store
        .add_expiry_user(Principal::from_text("agent"), request, START)
        .expect_err("zero period");
    assert!(matches!(err, WalletError::InvalidGrant(_)));
    assert!(store.is_empty());
}

#[test]
fn new_grant_replaces_old_one_wholesale() {
    let mut store = AuthorizationStore::default();
    let agent = Principal::from_text("agent");
    let target = Principal::from_text("t");

    store
        .add_expiry_user(
            agent.clone(),
            entry("t", vec![Method::new("foo", CallKind::Call)]),
            START,
        )
        .expect("first grant");
    store
        .add_expiry_user(
            agent.clone(),
            entry("t", vec![Method::new("bar", CallKind::Call)]),
            START + 1,
        )
        .expect("second grant");

    assert_eq!(store.len(), 1);
    assert_eq!(store.check(&agent, &target, "foo", START + 2), AccessCheck::MethodNotGranted);
    assert_eq!(store.check(&agent, &target, "bar", START + 2), AccessCheck::Granted);
    assert_eq!(store.grant(&agent).map(|g| g.granted_at), Some(START + 1));
}

#[test]
fn check_distinguishes_failure_reasons() {
    let mut store = AuthorizationStore::default();
    let agent = Principal::from_text("agent");
    let mut request = entry("t", vec![Method::new("foo", CallKind::Call)]);
    request.expiration = Some(HOUR);
    store
        .add_expiry_user(agent.clone(), request, START)
        .expect("grant");

    let t = Principal::from_text("t");
    let other = Principal::from_text("other");
    assert_eq!(
        store.check(&Principal::from_text("nobody"), &t, "foo", START),
        AccessCheck::NoGrant
    );
    assert_eq!(store.check(&agent, &other, "foo", START), AccessCheck::TargetNotGranted);
    assert_eq!(store.check(&agent, &t, "bar", START), AccessCheck::MethodNotGranted);
    assert_eq!(store.check(&agent, &t, "foo", START), AccessCheck::Granted);
    assert_eq!(store.check(&agent, &t, "foo", START + HOUR), AccessCheck::Expired);
}

#[test]
fn key_operations_are_never_directly_authorized() {
    let mut store = AuthorizationStore::default();
    let agent = Principal::from_text("agent");
    let t = Principal::from_text("t");
    store
        .add_expiry_user(
            agent.clone(),
            entry(
                "t",
                vec![
                    Method::new("plain", CallKind::Call),
                    Method::new("sensitive", CallKind::Call).key(),
                ],
            ),
            START,
        )
        .expect("grant");

    let plain = Method::new("plain", CallKind::Call);
    let sensitive = Method::new("sensitive", CallKind::Call);
    assert!(store.is_authorized(&agent, &t, &plain, START));
    assert!(!store.is_authorized(&agent, &t, &sensitive, START));
    assert!(store.is_key_operation(&agent, &t, "sensitive"));

    store.set_key_operation(t.clone(), "plain".to_owned(), true);
    assert!(!store.is_authorized(&agent, &t, &plain, START));
    store.set_key_operation(t.clone(), "plain".to_owned(), false);
    assert!(store.is_authorized(&agent, &t, &plain, START));
}

#[test]
fn adding_a_grant_prunes_expired_ones() {
    let mut store = AuthorizationStore::new(HOUR, ValidationMode::All);
    store
        .add_expiry_user(
            Principal::from_text("old"),
            entry("t", vec![Method::new("foo", CallKind::Call)]),
            START,
        )
        .expect("old grant");
    store
        .add_expiry_user(
            Principal::from_text("new"),
            entry("t", vec![Method::new("foo", CallKind::Call)]),
            START + HOUR,
        )
        .expect("new grant");

    assert_eq!(store.len(), 1);
    assert!(store.grant(&Principal::from_text("old")).is_none());
}

#[test]
fn prune_reports_how_many_grants_it_dropped() {
    let mut store = AuthorizationStore::new(HOUR, ValidationMode::All);
    for user in ["a", "b"] {
        store
            .add_expiry_user(
                Principal::from_text(user),
                entry("t", vec![Method::new("foo", CallKind::Call)]),
                START,
            )
            .expect("grant");
    }

    assert_eq!(store.prune_expired(START + HOUR - 1), 0);
    assert_eq!(store.prune_expired(START + HOUR), 2);
    assert_eq!(store.prune_expired(START + HOUR), 0);
    assert!(store.is_empty());
}

#[tokio::test]
async fn grant_is_live_until_expiry_instant() {
    let fx = fixture();
    let mut request = fx.grant_all();
    request.expiration = Some(HOUR);
    fx.grant_agent(request).await;

    let expires_at = START + HOUR;
    fx.clock.set(expires_at - 1);
    assert!(fx.wallet.is_authorized(&fx.agent, &fx.target, "test_call").await);
    assert!(fx
        .wallet
        .proxy_call(&fx.agent, fx.call("test_call", "just in time"))
        .await
        .is_ok());

    fx.clock.set(expires_at + 1);
    assert!(!fx.wallet.is_authorized(&fx.agent, &fx.target, "test_call").await);
    let err = fx
        .wallet
        .proxy_call(&fx.agent, fx.call("test_call", "too late"))
        .await
        .expect_err("grant expired");
    assert!(matches!(err, WalletError::Unauthorized(_)), "got {err:?}");
}

#[tokio::test]
async fn expiry_period_change_applies_to_future_grants_only() {
    let fx = fixture();
    fx.grant_agent(fx.grant_all()).await;

    fx.wallet
        .set_expiry_period(&fx.owner, HOUR)
        .await
        .expect("owner may change period");
    fx.clock.advance(2 * HOUR);
    assert!(
        fx.wallet.is_authorized(&fx.agent, &fx.target, "test_call").await,
        "existing grant keeps its original expiry"
    );

    let other = Principal::from_text("other");
    let grant = fx
        .wallet
        .add_expiry_user(&fx.owner, other, fx.grant_all())
        .await
        .expect("grant");
    assert_eq!(grant.expires_at - grant.granted_at, HOUR);
}

#[tokio::test]
async fn only_owners_grant() {
    let fx = fixture();
    let err = fx
        .wallet
        .add_expiry_user(&fx.agent, fx.agent.clone(), fx.grant_all())
        .await
        .expect_err("agent is not an owner");
    assert_eq!(err, WalletError::NotOwner(fx.agent.clone()));
}

#[tokio::test]
async fn is_authorized_uses_live_interface() {
    let fx = fixture_with(|s| s.validate_type = ValidationMode::All);
    fx.grant_agent(fx.grant_only(&[("test_call", false), ("test_call_key", true)]))
        .await;

    assert!(fx.wallet.is_authorized(&fx.agent, &fx.target, "test_call").await);
    assert!(!fx.wallet.is_authorized(&fx.agent, &fx.target, "test_call_key").await);
    assert!(!fx.wallet.is_authorized(&fx.agent, &fx.target, "test_query").await);
    assert!(!fx.wallet.is_authorized(&fx.agent, &fx.target, "no_such_method").await);
}
