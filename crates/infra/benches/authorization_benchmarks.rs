use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, Utc};
use escrowdesk_auth::{AuthorizationEngine, PrivilegeCatalog, RoleKind, SessionClaims, actions, default_catalog};
use escrowdesk_contracts::{
    AgreeToContract, AgreementMode, Contract, ContractCommand, ContractParty, CreateContract, Party,
    PaymentMode,
};
use escrowdesk_core::{CompanyId, ContractId, Money, UserId};
use escrowdesk_events::{EventEnvelope, InMemoryEventBus};
use escrowdesk_infra::command_dispatcher::CommandDispatcher;
use escrowdesk_infra::event_store::InMemoryEventStore;
use escrowdesk_infra::privilege_store::InMemoryPrivilegeStore;
use escrowdesk_infra::projections::{ContractsProjection, replay};
use escrowdesk_infra::read_model::InMemoryReadModelStore;
use serde_json::Value as JsonValue;
use std::sync::Arc;

fn claims(user_id: UserId) -> SessionClaims {
    SessionClaims {
        sub: user_id,
        display_id: "USR-BENCH".to_string(),
        roles: vec![],
        company_id: None,
        iat: 0,
        exp: i64::MAX,
    }
}

/// Catalog with `users` extra users holding buyer/seller roles, plus the
/// benchmarked buyer.
fn populated_catalog(users: usize) -> (PrivilegeCatalog, UserId) {
    let mut catalog = default_catalog().unwrap();
    for i in 0..users {
        let kind = if i % 2 == 0 { RoleKind::Buyer } else { RoleKind::Seller };
        catalog.assign_role(UserId::new(), kind);
    }
    let buyer = UserId::new();
    catalog.assign_role(buyer, RoleKind::Buyer);
    (catalog, buyer)
}

fn bench_decision_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("authorization_decision");
    let engine = AuthorizationEngine::default();

    for users in [10usize, 1_000, 10_000].iter() {
        let (catalog, buyer) = populated_catalog(*users);
        let session = claims(buyer);
        let slice = catalog.slice_for(buyer, actions::CONTRACT_AGREE.as_str());

        group.bench_with_input(BenchmarkId::new("full_catalog_grant", users), users, |b, _| {
            b.iter(|| {
                engine
                    .is_authorized(&catalog, Some(black_box(&session)), actions::CONTRACT_AGREE.as_str())
                    .unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("sliced_grant", users), users, |b, _| {
            b.iter(|| {
                engine
                    .is_authorized(&slice, Some(black_box(&session)), actions::CONTRACT_AGREE.as_str())
                    .unwrap()
            });
        });

        group.bench_with_input(BenchmarkId::new("full_catalog_denial", users), users, |b, _| {
            b.iter(|| {
                engine
                    .is_authorized(&catalog, Some(black_box(&session)), actions::DISPUTE_RESOLVE.as_str())
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_shared_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_privilege_store");
    let (catalog, buyer) = populated_catalog(1_000);
    let store = InMemoryPrivilegeStore::new(catalog);
    let engine = AuthorizationEngine::default();
    let session = claims(buyer);

    group.bench_function("decide_under_read_lock", |b| {
        b.iter(|| {
            engine
                .is_authorized(&store, Some(black_box(&session)), actions::CONTRACT_CREATE.as_str())
                .unwrap()
        });
    });

    group.bench_function("snapshot_slice", |b| {
        b.iter(|| store.slice_for(black_box(buyer), actions::CONTRACT_CREATE.as_str()).unwrap());
    });

    group.finish();
}

fn bench_contract_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("contract_projection_rebuild");

    for contracts in [10usize, 100, 1_000].iter() {
        let bus: Arc<InMemoryEventBus<EventEnvelope<JsonValue>>> = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), bus);
        let now = Utc::now();

        for _ in 0..*contracts {
            let contract_id = ContractId::new();
            let create = ContractCommand::Create(CreateContract {
                contract_id,
                name: "Bench contract".to_string(),
                created_by: UserId::new(),
                creator_party: Party::Buyer,
                buyer: ContractParty { company_id: CompanyId::new(), user_id: None },
                seller: ContractParty { company_id: CompanyId::new(), user_id: None },
                base_amount: Money::from_minor(250_000),
                payment_mode: PaymentMode::FullPayment,
                agreement_mode: AgreementMode::Bilateral,
                planned_start: now + Duration::days(1),
                planned_end: now + Duration::days(10),
                occurred_at: now,
            });
            dispatcher
                .dispatch(contract_id.into(), "contract", &create, |id| Contract::empty(id.into()))
                .unwrap();
            for party in [Party::Buyer, Party::Seller] {
                let agree = ContractCommand::Agree(AgreeToContract {
                    party,
                    user_id: UserId::new(),
                    occurred_at: now,
                });
                dispatcher
                    .dispatch(contract_id.into(), "contract", &agree, |id| Contract::empty(id.into()))
                    .unwrap();
            }
        }

        group.throughput(Throughput::Elements((*contracts * 3) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(contracts), contracts, |b, _| {
            b.iter(|| {
                let projection = ContractsProjection::new(Arc::new(InMemoryReadModelStore::new()));
                let applied = replay(dispatcher.store(), |env| projection.apply_envelope(env)).unwrap();
                black_box(applied)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_decision_latency,
    bench_shared_store,
    bench_contract_replay
);
criterion_main!(benches);
