use crate::domain::claim::Claim;
use crate::domain::ports::ClaimPublisher;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, Options};
use std::path::Path;
use std::sync::Arc;

/// Column Family holding claims awaiting human review.
pub const CF_CLAIMS: &str = "claims";

/// A persistent review queue backed by RocksDB.
///
/// Claims are keyed by order id, so publishing the same order twice is
/// acknowledged without a second write. Values are JSON.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBReviewQueue {
    db: Arc<DB>,
}

impl RocksDBReviewQueue {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the "claims" column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_claims = ColumnFamilyDescriptor::new(CF_CLAIMS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_claims])?;

        Ok(Self { db: Arc::new(db) })
    }

    fn claims_cf(&self) -> Result<&rocksdb::ColumnFamily> {
        self.db.cf_handle(CF_CLAIMS).ok_or_else(|| {
            PaymentError::InternalError(Box::new(std::io::Error::other(
                "Claims column family not found",
            )))
        })
    }
}

#[async_trait]
impl ClaimPublisher for RocksDBReviewQueue {
    async fn publish(&self, claim: &Claim) -> Result<()> {
        let cf = self.claims_cf()?;
        let key = claim.order_id.as_str().as_bytes();

        if self.db.get_pinned_cf(cf, key)?.is_some() {
            return Ok(());
        }

        let value = serde_json::to_vec(claim).map_err(|e| {
            PaymentError::InternalError(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Serialization error: {}", e),
            )))
        })?;
        self.db.put_cf(cf, key, value)?;

        Ok(())
    }

    async fn published(&self) -> Result<Vec<Claim>> {
        let cf = self.claims_cf()?;
        let mut claims = Vec::new();

        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let claim: Claim = serde_json::from_slice(&value).map_err(|e| {
                PaymentError::InternalError(Box::new(std::io::Error::other(format!(
                    "Failed to deserialize claim: {}",
                    e
                ))))
            })?;
            claims.push(claim);
        }

        Ok(claims)
    }
}
