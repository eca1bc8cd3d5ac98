//! Direct driver access to a test deployment.
//!
//! The orchestrator talks to the data plane for two things only: seeding
//! collections before the workload starts, and finding out which region the
//! current primary lives in.

use mdrill_common::SeedCollection;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{Acknowledgment, ClientOptions, CollectionOptions, Credential, WriteConcern};
use mongodb::Client;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("failed to create runtime for driver calls: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("driver error: {0}")]
    Driver(#[from] mongodb::error::Error),

    #[error("seed document cannot be converted to BSON: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error("`{0}` missing from server reply")]
    MissingField(&'static str),

    #[error("no replica set member advertises primary {0:?} as its public horizon")]
    PrimaryNotFound(String),
}

/// Data-plane operations used while running a test case.
pub trait DeploymentProbe: Send + Sync {
    /// Drop and re-insert each seed collection with majority write concern.
    fn load_initial_data(
        &self,
        connection_string: &str,
        collections: &[SeedCollection],
    ) -> Result<(), DeploymentError>;

    /// Region tag of the member currently acting as primary.
    fn primary_region(
        &self,
        connection_string: &str,
        username: &str,
        password: &str,
    ) -> Result<String, DeploymentError>;
}

/// [`DeploymentProbe`] backed by the MongoDB driver.
///
/// Owns a current-thread runtime; each call builds a fresh client and drops
/// it before returning.
#[derive(Debug)]
pub struct MongoProbe {
    runtime: Runtime,
}

impl MongoProbe {
    pub fn new() -> Result<Self, DeploymentError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DeploymentError::Runtime)?;
        Ok(Self { runtime })
    }
}

impl DeploymentProbe for MongoProbe {
    fn load_initial_data(
        &self,
        connection_string: &str,
        collections: &[SeedCollection],
    ) -> Result<(), DeploymentError> {
        self.runtime.block_on(async {
            let client = Client::with_uri_str(connection_string).await?;
            let majority = WriteConcern::builder().w(Acknowledgment::Majority).build();
            for seed in collections {
                info!(
                    "Loading {} documents into {}.{}",
                    seed.documents.len(),
                    seed.database,
                    seed.collection
                );
                let options = CollectionOptions::builder()
                    .write_concern(majority.clone())
                    .build();
                let collection = client
                    .database(&seed.database)
                    .collection_with_options::<Document>(&seed.collection, options);
                collection.drop().await?;
                if seed.documents.is_empty() {
                    continue;
                }
                let documents = seed
                    .documents
                    .iter()
                    .map(mongodb::bson::to_document)
                    .collect::<Result<Vec<_>, _>>()?;
                collection.insert_many(documents).await?;
            }
            Ok::<(), DeploymentError>(())
        })
    }

    fn primary_region(
        &self,
        connection_string: &str,
        username: &str,
        password: &str,
    ) -> Result<String, DeploymentError> {
        self.runtime.block_on(async {
            let mut options = ClientOptions::parse(connection_string).await?;
            options.credential = Some(
                Credential::builder()
                    .username(username.to_string())
                    .password(password.to_string())
                    .build(),
            );
            let client = Client::with_options(options)?;
            let admin = client.database("admin");

            let hello = admin.run_command(doc! {"hello": 1}).await?;
            let primary = hello
                .get_str("primary")
                .map_err(|_| DeploymentError::MissingField("primary"))?
                .to_string();
            let reply = admin.run_command(doc! {"replSetGetConfig": 1}).await?;
            debug!("Primary is {}", primary);
            region_of_primary(&reply, &primary)
        })
    }
}

/// Find the member whose public horizon is `primary` and return its region.
fn region_of_primary(reply: &Document, primary: &str) -> Result<String, DeploymentError> {
    let members = reply
        .get_document("config")
        .and_then(|config| config.get_array("members"))
        .map_err(|_| DeploymentError::MissingField("config.members"))?;

    for member in members {
        let Bson::Document(member) = member else {
            continue;
        };
        let public = member
            .get_document("horizons")
            .ok()
            .and_then(|horizons| horizons.get_str("PUBLIC").ok());
        if public != Some(primary) {
            continue;
        }
        return member
            .get_document("tags")
            .ok()
            .and_then(|tags| tags.get_str("region").ok())
            .map(str::to_string)
            .ok_or(DeploymentError::MissingField("tags.region"));
    }
    Err(DeploymentError::PrimaryNotFound(primary.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply() -> Document {
        doc! {
            "config": {
                "members": [
                    {"host": "internal-0:27017", "horizons": {"PUBLIC": "a.net:27017"}, "tags": {"region": "US_EAST_1"}},
                    {"host": "internal-1:27017", "horizons": {"PUBLIC": "b.net:27017"}, "tags": {"region": "US_WEST_2"}},
                    {"host": "internal-2:27017", "tags": {"region": "EU_WEST_1"}},
                ]
            },
            "ok": 1,
        }
    }

    #[test]
    fn matches_primary_by_public_horizon() {
        assert_eq!(region_of_primary(&reply(), "b.net:27017").unwrap(), "US_WEST_2");
    }

    #[test]
    fn internal_host_is_not_matched() {
        let err = region_of_primary(&reply(), "internal-2:27017").unwrap_err();
        assert!(matches!(err, DeploymentError::PrimaryNotFound(_)));
    }

    #[test]
    fn missing_region_tag_is_reported() {
        let reply = doc! {
            "config": {"members": [{"horizons": {"PUBLIC": "a:1"}}]}
        };
        let err = region_of_primary(&reply, "a:1").unwrap_err();
        assert!(matches!(err, DeploymentError::MissingField("tags.region")));
    }

    #[test]
    fn malformed_reply_is_reported() {
        let err = region_of_primary(&doc! {"ok": 1}, "a:1").unwrap_err();
        assert!(matches!(err, DeploymentError::MissingField("config.members")));
    }
}
