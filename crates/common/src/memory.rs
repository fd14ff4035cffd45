//! In-memory `ScanStore`, for tests and one-shot CLI runs.

use crate::error::{MinerScopeError, MinerScopeResult};
use crate::traits::ScanStore;
use crate::types::{HostRecord, ScanId, ScanRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryScanStore {
    scans: Mutex<HashMap<ScanId, ScanRecord>>,
    hosts: Mutex<HashMap<ScanId, Vec<HostRecord>>>,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_scan(&self, id: ScanId) -> Option<ScanRecord> {
        self.scans.lock().await.get(&id).cloned()
    }

    pub async fn host_results(&self, id: ScanId) -> Vec<HostRecord> {
        self.hosts.lock().await.get(&id).cloned().unwrap_or_default()
    }

    pub async fn miner_hosts(&self, id: ScanId) -> Vec<HostRecord> {
        self.host_results(id)
            .await
            .into_iter()
            .filter(|h| h.classification.is_miner)
            .collect()
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn create_scan_record(&self, record: ScanRecord) -> MinerScopeResult<ScanId> {
        let id = record.id;
        self.scans.lock().await.insert(id, record);
        self.hosts.lock().await.entry(id).or_default();
        Ok(id)
    }

    async fn append_host_result(&self, host: &HostRecord) -> MinerScopeResult<()> {
        let mut hosts = self.hosts.lock().await;
        let entry = hosts.get_mut(&host.scan_id).ok_or_else(|| {
            MinerScopeError::Storage(format!("unknown scan {}", host.scan_id))
        })?;
        entry.push(host.clone());
        Ok(())
    }

    async fn finalize_scan_record(&self, record: &ScanRecord) -> MinerScopeResult<()> {
        let mut scans = self.scans.lock().await;
        match scans.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(MinerScopeError::Storage(format!("unknown scan {}", record.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Classification, HostScanResult, ScanStatus};
    use std::net::Ipv4Addr;

    fn host(scan_id: ScanId, last: u8, is_miner: bool) -> HostRecord {
        HostRecord {
            scan_id,
            scan: HostScanResult::new(Ipv4Addr::new(10, 0, 0, last)),
            classification: Classification {
                is_miner,
                ..Classification::clean()
            },
            geo: None,
            geo_error: None,
        }
    }

    #[tokio::test]
    async fn records_round_trip() {
        let store = MemoryScanStore::new();
        let id = store
            .create_scan_record(ScanRecord::new("test", "10.0.0.0/30", 2))
            .await
            .unwrap();

        store.append_host_result(&host(id, 1, true)).await.unwrap();
        store.append_host_result(&host(id, 2, false)).await.unwrap();
        assert_eq!(store.host_results(id).await.len(), 2);
        assert_eq!(store.miner_hosts(id).await.len(), 1);

        let mut record = store.get_scan(id).await.unwrap();
        record.status = ScanStatus::Completed;
        record.miners_detected = 1;
        store.finalize_scan_record(&record).await.unwrap();
        assert_eq!(store.get_scan(id).await.unwrap().status, ScanStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_scan_is_storage_error() {
        let store = MemoryScanStore::new();
        let orphan = host(uuid::Uuid::new_v4(), 1, false);
        let err = store.append_host_result(&orphan).await.unwrap_err();
        assert!(matches!(err, MinerScopeError::Storage(_)));
    }
}
