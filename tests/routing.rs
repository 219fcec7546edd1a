use agency_router::{
    Alias, ConnectionRegistry, HandleState, MemoryConnector, Reaper, RequestContext, Role,
    Router, RoutingError, Settings, StaticTenantSource, Tenant, TenantDirectory,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    directory: TenantDirectory,
    router: Arc<Router<MemoryConnector>>,
    reaper: Reaper<MemoryConnector>,
}

fn fixture(connector: MemoryConnector) -> Fixture {
    let settings = Settings::from_lookup(|_| None).unwrap();
    let directory = TenantDirectory::new(Arc::new(StaticTenantSource::new([
        Tenant { id: 7, name: "Acme".into() },
        Tenant { id: 9, name: "Globex".into() },
    ])));
    let registry = Arc::new(ConnectionRegistry::new(connector, settings.idle_after));
    let reaper = Reaper::new(Arc::clone(&registry), settings.reaper.clone());
    Fixture {
        directory,
        router: Arc::new(Router::from_settings(registry, &settings)),
        reaper,
    }
}

fn primary_acme() -> Alias {
    Alias::for_tenant(Role::Primary, &Tenant { id: 7, name: "Acme".into() }).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_access_registers_once() {
    let fx = fixture(MemoryConnector::new().with_open_delay(Duration::from_millis(25)));
    let ctx = RequestContext::new(&fx.directory, Some("7")).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let router = Arc::clone(&fx.router);
            let ctx = ctx.clone();
            tokio::spawn(async move { router.connection(&ctx, Role::Primary).await.unwrap() })
        })
        .collect();
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(fx.router.registry().connector().opened(), 1);
    assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
}

#[tokio::test]
async fn stored_name_casing_does_not_change_the_alias() {
    for name in ["Acme", "ACME", "acme", " aCmE "] {
        let alias = Alias::for_tenant(Role::Primary, &Tenant { id: 7, name: name.into() }).unwrap();
        assert_eq!(alias.as_str(), "primary_acme");
    }
}

#[tokio::test]
async fn control_resolves_with_or_without_tenant() {
    let fx = fixture(MemoryConnector::new());
    let anonymous = fx
        .router
        .resolve_alias(&RequestContext::anonymous(), Role::Control)
        .await
        .unwrap();
    let ctx = RequestContext::new(&fx.directory, Some("9")).await.unwrap();
    let with_tenant = fx.router.resolve_alias(&ctx, Role::Control).await.unwrap();
    assert_eq!(anonymous, Alias::control());
    assert_eq!(with_tenant, Alias::control());
}

#[tokio::test]
async fn unknown_tenant_registers_nothing() {
    let fx = fixture(MemoryConnector::new());
    assert!(matches!(
        fx.directory.resolve(999_999).await,
        Err(RoutingError::TenantNotFound(999_999))
    ));

    let ctx = RequestContext::new(&fx.directory, Some("999999")).await.unwrap();
    assert!(ctx.tenant().is_none());
    for role in Role::TENANT_SCOPED {
        assert!(matches!(
            fx.router.resolve_alias(&ctx, role).await,
            Err(RoutingError::MissingTenantContext(_))
        ));
    }
    assert!(fx.router.registry().is_empty());
    assert_eq!(fx.router.registry().connector().opened(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interleaved_requests_never_swap_tenants() {
    let fx = fixture(MemoryConnector::new().with_open_delay(Duration::from_millis(2)));
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut tasks = Vec::new();
    for i in 0..64 {
        let id = if rng.gen_bool(0.5) { "7" } else { "9" };
        let steps: Vec<(Role, u64)> = (0..8)
            .map(|_| {
                let role = if rng.gen_bool(0.5) { Role::Primary } else { Role::Secondary };
                (role, rng.gen_range(0..3))
            })
            .collect();
        let router = Arc::clone(&fx.router);
        let directory = fx.directory.clone();
        tasks.push(tokio::spawn(async move {
            let ctx = RequestContext::new(&directory, Some(id)).await.unwrap();
            let expected = ctx.tenant().unwrap().name.to_lowercase();
            for (role, pause_ms) in steps {
                tokio::time::sleep(Duration::from_millis(pause_ms)).await;
                let alias = router.resolve_alias(&ctx, role).await.unwrap();
                assert_eq!(
                    alias.as_str(),
                    format!("{}_{}", role, expected),
                    "request {} resolved another tenant's alias",
                    i
                );
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(fx.router.registry().connector().opened(), 4);
}

#[tokio::test(start_paused = true)]
async fn idle_handle_is_reclaimed_and_recreated_fresh() {
    let fx = fixture(MemoryConnector::new());
    let ctx = RequestContext::new(&fx.directory, Some("7")).await.unwrap();
    let alias = primary_acme();
    assert_eq!(fx.router.registry().state(&alias), HandleState::Unregistered);

    let first = fx.router.connection(&ctx, Role::Primary).await.unwrap();
    assert_eq!(first.alias(), &alias);
    assert_eq!(fx.router.registry().state(&alias), HandleState::Active);

    tokio::time::advance(Duration::from_secs(3601)).await;
    let report = fx.reaper.sweep().await;
    assert_eq!(report.reaped, vec![alias.clone()]);
    assert!(first.is_closed());
    assert_eq!(fx.router.registry().state(&alias), HandleState::Unregistered);

    let second = fx.router.connection(&ctx, Role::Primary).await.unwrap();
    assert!(!second.is_closed());
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.generation() > first.generation());
    assert_eq!(fx.router.registry().state(&alias), HandleState::Active);
    assert_eq!(fx.router.registry().connector().opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn recently_touched_handle_survives_the_sweep() {
    let fx = fixture(MemoryConnector::new());
    let ctx = RequestContext::new(&fx.directory, Some("7")).await.unwrap();
    fx.router.resolve_alias(&ctx, Role::Primary).await.unwrap();

    tokio::time::advance(Duration::from_secs(3600)).await;
    fx.router.registry().touch(&primary_acme()).unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;

    assert!(fx.reaper.sweep().await.reaped.is_empty());
    assert_eq!(fx.router.registry().state(&primary_acme()), HandleState::Active);
}

#[tokio::test]
async fn one_tenant_outage_leaves_others_routable() {
    let settings = Settings::from_lookup(|key| match key {
        "DB_HOST_SECONDARY" => Some("clients-db".into()),
        _ => None,
    })
    .unwrap();
    let registry = Arc::new(ConnectionRegistry::new(
        MemoryConnector::new().failing_host("clients-db"),
        settings.idle_after,
    ));
    let router = Router::from_settings(registry, &settings);
    let ctx = RequestContext::for_tenant(Tenant { id: 7, name: "Acme".into() });

    let err = router.resolve_alias(&ctx, Role::Secondary).await.unwrap_err();
    assert!(matches!(err, RoutingError::ConnectionUnavailable { ref alias, .. } if alias.as_str() == "secondary_acme"));
    assert_eq!(router.resolve_alias(&ctx, Role::Primary).await.unwrap(), primary_acme());
    assert_eq!(router.warm(&ctx).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_host_fails_every_waiting_request_once() {
    let settings = Settings::from_lookup(|key| match key {
        "DB_HOST_SECONDARY" => Some("down-db".into()),
        _ => None,
    })
    .unwrap();
    let registry = Arc::new(ConnectionRegistry::new(
        MemoryConnector::new()
            .failing_host("down-db")
            .with_open_delay(Duration::from_secs(10)),
        settings.idle_after,
    ));
    let router = Arc::new(Router::from_settings(registry, &settings));
    let ctx = RequestContext::for_tenant(Tenant { id: 7, name: "Acme".into() });
    let started = tokio::time::Instant::now();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let router = Arc::clone(&router);
            let ctx = ctx.clone();
            tokio::spawn(async move { router.connection(&ctx, Role::Secondary).await.err() })
        })
        .collect();
    for task in tasks {
        assert!(matches!(
            task.await.unwrap(),
            Some(RoutingError::ConnectionUnavailable { ref alias, .. }) if alias.as_str() == "secondary_acme"
        ));
    }

    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(router.registry().connector().attempts(), 1);
    assert!(router.registry().is_empty());
}
