use docprovider::{
    bson::{doc, oid::ObjectId},
    memory::InMemoryConnection,
    prelude::*,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<ObjectId>,
    email: String,
    active: bool,
    logins: i32,
}

struct Accounts;

impl ProviderDefinition for Accounts {
    const COLLECTION: &'static str = "accounts";

    fn indexes() -> Vec<IndexSpec> {
        vec![
            IndexSpec::new(doc! { "email": 1 }).unique(),
            IndexSpec::new(doc! { "active": 1, "logins": -1 }),
        ]
    }
}

/// A concrete provider: the base contract plus account-specific queries.
struct AccountProvider {
    base: Provider<InMemoryConnection>,
}

impl CrudProvider for AccountProvider {
    type Connection = InMemoryConnection;

    fn provider(&self) -> &Provider<InMemoryConnection> {
        &self.base
    }
}

impl AccountProvider {
    /// Builds the provider and waits until its indexes exist.
    async fn open(connection: InMemoryConnection) -> ProviderResult<Self> {
        let (sender, receiver) = oneshot::channel();
        let base = Provider::builder(connection, ProviderConfig::of::<Accounts>()).build_with(
            move |result| {
                let _ = sender.send(result);
            },
        )?;

        receiver
            .await
            .map_err(|e| ProviderError::Initialization(e.to_string()))??;

        Ok(Self { base })
    }

    async fn register(&self, email: &str) -> ProviderResult<Account> {
        let account = Account {
            id: None,
            email: email.to_string(),
            active: true,
            logins: 0,
        };

        from_document(self.create_one_from(&account).await?)
    }

    async fn by_email(&self, email: &str) -> ProviderResult<Option<Account>> {
        self.find_only_as(doc! { "email": email }, None).await
    }

    async fn record_login(&self, email: &str) -> ProviderResult<Account> {
        from_document(
            self.find_and_update(doc! { "email": email }, doc! { "$inc": { "logins": 1 } })
                .await?,
        )
    }

    async fn deactivate_idle(&self) -> ProviderResult<u64> {
        self.update_only(doc! { "logins": 0 }, doc! { "$set": { "active": false } })
            .await
    }
}

async fn accounts() -> (InMemoryConnection, AccountProvider) {
    let connection = InMemoryConnection::builder()
        .collection(Accounts::COLLECTION)
        .build()
        .await
        .unwrap();
    let accounts = AccountProvider::open(connection.clone()).await.unwrap();

    (connection, accounts)
}

#[tokio::test]
async fn declared_indexes_exist_after_open() {
    let (connection, accounts) = accounts().await;

    let indexes = connection.list_indexes(accounts.collection_name()).await.unwrap();

    assert_eq!(
        indexes.iter().map(|index| index.name.as_str()).collect::<Vec<_>>(),
        vec!["_id_", "email_1", "active_1_logins_-1"]
    );
    assert!(indexes[1].unique);
}

#[tokio::test]
async fn typed_round_trip() {
    let (_, accounts) = accounts().await;

    let alice = accounts.register("alice@example.com").await.unwrap();
    assert!(alice.id.is_some());

    let found = accounts.by_email("alice@example.com").await.unwrap();
    assert_eq!(found, Some(alice.clone()));
    assert_eq!(accounts.by_email("bob@example.com").await.unwrap(), None);

    let fetched: Account = accounts
        .find_one_as(doc! { "_id": alice.id }, None)
        .await
        .unwrap();
    assert_eq!(fetched, alice);
}

#[tokio::test]
async fn unique_email_is_enforced() {
    let (_, accounts) = accounts().await;
    accounts.register("alice@example.com").await.unwrap();

    let err = accounts.register("alice@example.com").await.unwrap_err();

    assert!(matches!(err, ProviderError::Backend(message) if message.contains("email_1")));
}

#[tokio::test]
async fn domain_methods_use_the_base_contract() {
    let (_, accounts) = accounts().await;
    for email in ["a@example.com", "b@example.com", "c@example.com"] {
        accounts.register(email).await.unwrap();
    }

    let after = accounts.record_login("a@example.com").await.unwrap();
    assert_eq!(after.logins, 1);
    assert!(matches!(
        accounts.record_login("z@example.com").await,
        Err(ProviderError::DocumentNotFoundOrUpdated(_))
    ));

    assert_eq!(accounts.deactivate_idle().await.unwrap(), 2);
    assert_eq!(accounts.deactivate_idle().await.unwrap(), 2);

    let active: Vec<Account> = accounts
        .find_as(doc! { "active": true }, None)
        .await
        .unwrap();
    assert_eq!(
        active.into_iter().map(|account| account.email).collect::<Vec<_>>(),
        vec!["a@example.com"]
    );
}

#[tokio::test]
async fn open_fails_when_an_index_cannot_be_built() {
    let connection = InMemoryConnection::builder()
        .collection(Accounts::COLLECTION)
        .build()
        .await
        .unwrap();
    let raw = Provider::builder(connection.clone(), ProviderConfig::new(Accounts::COLLECTION))
        .ensure_on_build(false)
        .build()
        .unwrap();
    raw.create(vec![
        doc! { "email": "dup@example.com", "active": true, "logins": 0 },
        doc! { "email": "dup@example.com", "active": true, "logins": 0 },
    ])
    .await
    .unwrap();

    let result = AccountProvider::open(connection).await;

    assert!(matches!(result, Err(ProviderError::Backend(_))));
}
