//! Request persistence
//!
//! Every write after insert is a conditional update guarded by the version
//! and status the writer read. A guard failure is `AppError::Conflict`.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryRequestStore;
pub use sqlite::SqliteRequestStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::ids::RequestId;
use crate::workflow::request::Request;
use crate::workflow::state::RequestStatus;

/// A stored value with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

impl<T> Versioned<T> {
    pub fn new(version: u64, value: T) -> Self {
        Self { version, value }
    }
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Store a new request at version 1
    async fn insert(&self, request: &Request) -> Result<Versioned<Request>>;

    async fn get(&self, id: RequestId) -> Result<Option<Versioned<Request>>>;

    /// Replace the request only if it is still at `expected_version` and
    /// `expected_status`. Returns the new version.
    async fn compare_and_swap(
        &self,
        id: RequestId,
        expected_version: u64,
        expected_status: RequestStatus,
        next: &Request,
    ) -> Result<u64>;

    /// Requests currently in `status`, oldest first
    async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<Versioned<Request>>>;
}
