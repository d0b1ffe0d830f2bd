//! Infrastructure wiring: event store, bus, privilege store, projections,
//! workers, and the authorize → transition entry point used by handlers.

use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};

use escrowdesk_auth::{
    AuthorizationEngine, PrivilegeName, RoleKind, SessionClaims, StoreError, TokenService, User,
    default_catalog,
};
use escrowdesk_companies::Company;
use escrowdesk_contracts::{CompanyDirectory, Contract, Party, Transaction};
use escrowdesk_core::{Aggregate, AggregateId, CompanyId, ContractId, DomainError, TransactionId, UserId};
use escrowdesk_events::{EventBus, EventEnvelope, InMemoryEventBus, TracingNotificationSink};
use escrowdesk_infra::{
    command_dispatcher::CommandDispatcher,
    event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, StoredEvent},
    privilege_store::{InMemoryPrivilegeStore, PostgresPrivilegeStore, PrivilegeSnapshots, UserRoleLinks},
    projections::{
        CompanyReadModel, ContractSummary, ContractsProjection, DirectoryProjection, ProjectionError,
        TransactionReadModel, TransactionsProjection, UserReadModel, UsersProjection, replay,
    },
    read_model::InMemoryReadModelStore,
    workers::{NotificationWorker, ProjectionWorker, WorkerHandle},
    workflow::{ActionError, ActionWorkflow, RequestContext},
};

use crate::config::ApiConfig;

const SCHEMA: &str = include_str!("../../../../migrations/0001_init.sql");

/// Privilege backend: per-check snapshots plus user-role link writes.
pub trait PrivilegeBackend: PrivilegeSnapshots + UserRoleLinks {}

impl<T> PrivilegeBackend for T where T: PrivilegeSnapshots + UserRoleLinks + ?Sized {}

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Store = Arc<dyn EventStore>;
type Privileges = Arc<dyn PrivilegeBackend>;
type Rm<K, V> = Arc<InMemoryReadModelStore<K, V>>;

pub type Dispatcher = CommandDispatcher<Store, Bus>;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("privilege store: {0}")]
    Privileges(#[from] StoreError),

    #[error("seed catalog: {0}")]
    Seed(#[from] DomainError),

    #[error("projection replay: {0}")]
    Replay(#[from] EventStoreError),

    #[error("worker: {0}")]
    Worker(#[from] std::io::Error),

    #[error("startup task failed: {0}")]
    Join(String),
}

/// Read side. Shared between request handlers and the projection worker.
pub struct Projections {
    pub directory: DirectoryProjection<Rm<CompanyId, CompanyReadModel>>,
    pub contracts: ContractsProjection<Rm<ContractId, ContractSummary>>,
    pub transactions: TransactionsProjection<Rm<TransactionId, TransactionReadModel>>,
    pub users: UsersProjection<Rm<UserId, UserReadModel>, Privileges>,
}

impl Projections {
    fn new(privileges: Privileges) -> Self {
        Self {
            directory: DirectoryProjection::new(Arc::default()),
            contracts: ContractsProjection::new(Arc::default()),
            transactions: TransactionsProjection::new(Arc::default()),
            users: UsersProjection::new(Arc::default(), privileges),
        }
    }

    /// Apply one envelope to every projection; each ignores foreign streams.
    pub fn apply(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let outcomes = [
            self.directory.apply_envelope(envelope),
            self.contracts.apply_envelope(envelope),
            self.transactions.apply_envelope(envelope),
            self.users.apply_envelope(envelope),
        ];
        outcomes.into_iter().collect::<Result<Vec<_>, _>>().map(|_| ())
    }
}

pub struct AppServices {
    pub dispatcher: Dispatcher,
    pub privileges: Privileges,
    pub workflow: ActionWorkflow,
    pub tokens: TokenService,
    pub read: Arc<Projections>,
    bootstrap_admin_email: Option<String>,
    workers: Mutex<Vec<WorkerHandle>>,
}

pub async fn build_services(config: &ApiConfig) -> Result<AppServices, ServiceError> {
    let (store, privileges): (Store, Privileges) = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await?;
            sqlx::raw_sql(SCHEMA).execute(&pool).await?;

            let privileges = PostgresPrivilegeStore::new(pool.clone(), tokio::runtime::Handle::current());
            privileges.seed(&default_catalog()?).await?;
            info!("using postgres event and privilege stores");
            let store: Store = Arc::new(PostgresEventStore::new(pool));
            let privileges: Privileges = Arc::new(privileges);
            (store, privileges)
        }
        None => {
            info!("using in-memory event and privilege stores");
            let store: Store = Arc::new(InMemoryEventStore::new());
            let privileges: Privileges = Arc::new(InMemoryPrivilegeStore::new(default_catalog()?));
            (store, privileges)
        }
    };

    let read = Arc::new(Projections::new(privileges.clone()));

    // Rebuild read models before any command can append.
    {
        let store = store.clone();
        let read = read.clone();
        tokio::task::spawn_blocking(move || replay(&store, |env| read.apply(env)))
            .await
            .map_err(|e| ServiceError::Join(e.to_string()))??;
    }

    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let mut workers = Vec::new();
    {
        let read = read.clone();
        let handler = move |env: EventEnvelope<JsonValue>| read.apply(&env);
        workers.push(ProjectionWorker::spawn("projection-worker", &*bus, handler)?);
    }
    workers.push(NotificationWorker::spawn(&*bus, TracingNotificationSink)?);

    Ok(AppServices {
        dispatcher: CommandDispatcher::new(store, bus),
        privileges,
        workflow: ActionWorkflow::new(AuthorizationEngine::new(config.undeclared_action_policy)),
        tokens: TokenService::new(config.jwt_secret.as_bytes()).with_validity(config.session_ttl),
        read,
        bootstrap_admin_email: config.bootstrap_admin_email.clone(),
        workers: Mutex::new(workers),
    })
}

impl AppServices {
    /// Authorize `action` against a fresh privilege snapshot, then run
    /// `transition` on the blocking pool.
    pub async fn execute<T, F>(
        self: &Arc<Self>,
        ctx: RequestContext,
        action: PrivilegeName,
        transition: F,
    ) -> Result<T, ActionError>
    where
        T: Send + 'static,
        F: FnOnce(&AppServices, &SessionClaims, &RequestContext) -> Result<T, ActionError> + Send + 'static,
    {
        let user_id = ctx.user_id().ok_or(ActionError::Unauthenticated)?;
        let snapshot = self.privileges.snapshot(user_id, action.as_str()).await?;

        let services = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            services
                .workflow
                .run(&ctx, &snapshot, action.as_str(), |claims| transition(&services, claims, &ctx))
        })
        .await
        .map_err(|e| ActionError::Infrastructure(e.to_string()))?
    }

    /// Store work on the blocking pool for unauthenticated endpoints.
    pub async fn blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T, ActionError>
    where
        T: Send + 'static,
        F: FnOnce(&AppServices) -> Result<T, ActionError> + Send + 'static,
    {
        let services = Arc::clone(self);
        tokio::task::spawn_blocking(move || work(&services))
            .await
            .map_err(|e| ActionError::Infrastructure(e.to_string()))?
    }

    /// Run a command against one aggregate stream.
    pub fn dispatch<A>(
        &self,
        aggregate_id: impl Into<AggregateId>,
        aggregate_type: &str,
        command: &A::Command,
        make_aggregate: impl Fn(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, ActionError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: escrowdesk_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.dispatcher
            .dispatch(aggregate_id.into(), aggregate_type, command, make_aggregate)
            .map_err(ActionError::from)
    }

    pub fn load_contract(&self, contract_id: ContractId) -> Result<Contract, ActionError> {
        let contract: Contract = self.load(contract_id.into(), |id| Contract::empty(id.into()))?;
        if !contract.is_created() {
            return Err(ActionError::NotFound(format!("contract {contract_id}")));
        }
        Ok(contract)
    }

    pub fn load_transaction(&self, transaction_id: TransactionId) -> Result<Transaction, ActionError> {
        let tx: Transaction = self.load(transaction_id.into(), |id| Transaction::empty(id.into()))?;
        if !tx.is_created() {
            return Err(ActionError::NotFound(format!("transaction {transaction_id}")));
        }
        Ok(tx)
    }

    pub fn load_company(&self, company_id: CompanyId) -> Result<Company, ActionError> {
        let company: Company = self.load(company_id.into(), |id| Company::empty(id.into()))?;
        if !company.is_created() {
            return Err(ActionError::NotFound(format!("company {company_id}")));
        }
        Ok(company)
    }

    pub fn load_user(&self, user_id: UserId) -> Result<User, ActionError> {
        let user: User = self.load(user_id.into(), |id| User::empty(id.into()))?;
        if !user.created {
            return Err(ActionError::NotFound(format!("user {user_id}")));
        }
        Ok(user)
    }

    fn load<A>(&self, aggregate_id: AggregateId, make: impl Fn(AggregateId) -> A) -> Result<A, ActionError>
    where
        A: Aggregate,
        A::Event: serde::de::DeserializeOwned,
    {
        self.dispatcher.load(aggregate_id, make).map_err(ActionError::from)
    }

    /// Roles as resolved from the user's own stream, never from the token.
    pub fn roles_of(&self, user_id: UserId) -> Result<Vec<RoleKind>, ActionError> {
        let user = self.load_user(user_id)?;
        if !user.status.is_active() {
            return Ok(vec![]);
        }
        Ok(user.roles.clone())
    }

    pub fn is_admin(&self, user_id: UserId) -> Result<bool, ActionError> {
        Ok(self.roles_of(user_id)?.contains(&RoleKind::Admin))
    }

    /// Company the user acts for: the affiliation on their own stream, else the
    /// company they are contact person of. The session's company is not used.
    pub fn company_of(&self, user_id: UserId) -> Result<Option<CompanyId>, ActionError> {
        let user = self.load_user(user_id)?;
        Ok(user
            .company_id
            .or_else(|| self.read.directory.company_of_user(user_id)))
    }

    /// The side of `contract` the caller belongs to. `requested` picks a side
    /// explicitly; it must still be the caller's.
    pub fn acting_party(
        &self,
        contract: &Contract,
        claims: &SessionClaims,
        requested: Option<Party>,
    ) -> Result<Party, ActionError> {
        let company = self.company_of(claims.sub)?;
        let mine: Vec<Party> = [Party::Buyer, Party::Seller]
            .into_iter()
            .filter(|p| company.is_some() && contract.party(*p).map(|cp| cp.company_id) == company)
            .collect();

        match (requested, mine.as_slice()) {
            (Some(p), sides) if sides.contains(&p) => Ok(p),
            (None, [only]) => Ok(*only),
            (Some(p), _) => Err(ActionError::Guard {
                guard: "party_member".to_string(),
                message: format!("caller does not act for the {p} of this contract"),
            }),
            (None, _) => Err(ActionError::Guard {
                guard: "party_member".to_string(),
                message: "caller's company is not a party to this contract".to_string(),
            }),
        }
    }

    /// Parties of the contract and admins pass; everyone else is refused.
    pub fn ensure_involved(&self, contract: &Contract, claims: &SessionClaims) -> Result<(), ActionError> {
        if self.acting_party(contract, claims, None).is_ok() || self.is_admin(claims.sub)? {
            return Ok(());
        }
        Err(ActionError::Guard {
            guard: "party_member".to_string(),
            message: "caller's company is not a party to this contract".to_string(),
        })
    }

    /// Whether a new registration with `email` is the bootstrap admin.
    pub fn is_bootstrap_admin(&self, email: &str) -> bool {
        self.bootstrap_admin_email
            .as_deref()
            .is_some_and(|admin| admin == email.trim().to_lowercase())
    }

    /// Stop the background workers (tests and graceful shutdown).
    pub fn shutdown(&self) {
        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => {
                warn!("worker registry poisoned; workers left running");
                return;
            }
        };
        for handle in handles {
            handle.shutdown();
        }
    }

    pub fn subscribe(&self) -> escrowdesk_events::Subscription<EventEnvelope<JsonValue>> {
        self.dispatcher.bus().subscribe()
    }
}
