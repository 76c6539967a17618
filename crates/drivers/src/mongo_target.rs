use crate::preflight::log_target_preflight;
use crate::{Error, Result, TargetDriver};
use bson::{doc, Bson, Document};
use docdiff::FieldPath;
use mongodb::error::ErrorKind;
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};

/// The target MongoDB database.
pub struct MongoTarget {
    client: Client,
    db: Database,
}

impl MongoTarget {
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let options = client_options(uri).await?;
        let host = options
            .hosts
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<unknown-host>".to_string());
        tracing::info!(host, database, "creating target mongodb client");

        log_target_preflight(&options).await;

        let client = Client::with_options(options)?;
        let db = client.database(database);

        tracing::info!(host, database, "running target mongodb ping");
        client
            .database("admin")
            .run_command(doc! {"ping": 1}, None)
            .await
            .map_err(|err| wrap_ping_error(err, &host))?;
        tracing::info!(host, database, "target mongodb ping succeeded");

        Ok(Self { client, db })
    }
}

#[async_trait::async_trait]
impl TargetDriver for MongoTarget {
    async fn count_documents(&self, collection: &str) -> Result<u64> {
        Ok(self
            .db
            .collection::<Document>(collection)
            .count_documents(None, None)
            .await?)
    }

    async fn find_by_business_key(
        &self,
        collection: &str,
        business_key: &FieldPath,
        key_value: &Bson,
    ) -> Result<Option<Document>> {
        let filter = doc! {business_key.as_str(): key_value.clone()};
        Ok(self
            .db
            .collection::<Document>(collection)
            .find_one(filter, None)
            .await?)
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

/// Parse a MongoDB URI into client options, honoring env-configurable
/// timeouts when the URI does not already set them.
pub(crate) async fn client_options(uri: &str) -> Result<ClientOptions> {
    let mut options = ClientOptions::parse(uri).await?;

    if options.server_selection_timeout.is_none() {
        if let Some(timeout) = crate::env::env_millis("MONGODB_SERVER_SELECTION_TIMEOUT_MS") {
            options.server_selection_timeout = Some(timeout);
        }
    }
    if options.connect_timeout.is_none() {
        if let Some(timeout) = crate::env::env_millis("MONGODB_CONNECT_TIMEOUT_MS") {
            options.connect_timeout = Some(timeout);
        }
    }
    Ok(options)
}

/// Wrap initial-handshake failures with operational guidance: a server
/// selection timeout usually means a network-level problem, while a command
/// failure on `ping` usually means bad credentials.
fn wrap_ping_error(err: mongodb::error::Error, host: &str) -> Error {
    match &*err.kind {
        ErrorKind::ServerSelection { .. } => Error::Unavailable {
            context: format!(
                "unable to connect to target MongoDB at {host} (timed out). \
                 Check MONGODB_URI and network access (VPN/firewall/IP allowlist)"
            ),
            source: Box::new(err),
        },
        ErrorKind::Authentication { .. } | ErrorKind::Command(_) => Error::Unavailable {
            context: format!(
                "connected to target MongoDB at {host}, but authentication/authorization \
                 failed. Check username/password, authSource, and user permissions in MONGODB_URI"
            ),
            source: Box::new(err),
        },
        _ => Error::Mongo(err),
    }
}
