//! In-process request store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{RequestStore, Versioned};
use crate::error::{AppError, Result};
use crate::ids::RequestId;
use crate::workflow::request::Request;
use crate::workflow::state::RequestStatus;

pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<RequestId, Versioned<Request>>>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.requests.read().await.len()
    }
}

impl Default for InMemoryRequestStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn insert(&self, request: &Request) -> Result<Versioned<Request>> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id()) {
            return Err(AppError::conflict(request.id(), "request already exists"));
        }
        let stored = Versioned::new(1, request.clone());
        requests.insert(request.id(), stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: RequestId) -> Result<Option<Versioned<Request>>> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id).cloned())
    }

    async fn compare_and_swap(
        &self,
        id: RequestId,
        expected_version: u64,
        expected_status: RequestStatus,
        next: &Request,
    ) -> Result<u64> {
        if next.id() != id {
            return Err(AppError::Internal(format!(
                "request {} written under id {}",
                next.id(),
                id
            )));
        }

        // Guard check and write under one lock
        let mut requests = self.requests.write().await;
        let current = requests
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Request {} not found", id)))?;

        if current.version != expected_version || current.value.status() != expected_status {
            return Err(AppError::conflict(
                id,
                format!(
                    "expected version {} ({}), found version {} ({})",
                    expected_version,
                    expected_status,
                    current.version,
                    current.value.status()
                ),
            ));
        }

        current.version += 1;
        current.value = next.clone();
        Ok(current.version)
    }

    async fn list_by_status(&self, status: RequestStatus) -> Result<Vec<Versioned<Request>>> {
        let requests = self.requests.read().await;
        let mut matching: Vec<Versioned<Request>> = requests
            .values()
            .filter(|r| r.value.status() == status)
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.value.created_at(), r.value.id()));
        Ok(matching)
    }
}
