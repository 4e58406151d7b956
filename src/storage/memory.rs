//! In-process storage engine.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{DEFAULT_LIST_LIMIT, FlavorStore, ServiceStore, StoreError};
use crate::model::{
    DeleteAttempt, Flavor, ProviderDetail, ProviderStatus, ServiceRecord, ServiceSpec,
};

const STORAGE_NAME: &str = "memory";

type RecordKey = (String, String);

/// Mutex-guarded service records keyed by tenant and service name.
///
/// The store can be switched offline to exercise storage outages; while
/// offline every operation returns [`StoreError::Unavailable`].
#[derive(Debug)]
pub struct MemoryServiceStore {
    records: Mutex<BTreeMap<RecordKey, ServiceRecord>>,
    online: AtomicBool,
}

impl Default for MemoryServiceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryServiceStore {
    /// Creates an empty, online store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Switches the store on or offline.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn records(&self) -> Result<MutexGuard<'_, BTreeMap<RecordKey, ServiceRecord>>, StoreError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                storage: STORAGE_NAME.to_owned(),
                message: String::from("store is offline"),
            });
        }
        Ok(self.records.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn with_record<T>(
        &self,
        tenant_id: &str,
        service_name: &str,
        apply: impl FnOnce(&mut ServiceRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut records = self.records()?;
        records
            .get_mut(&key(tenant_id, service_name))
            .map(apply)
            .ok_or_else(|| StoreError::service_not_found(service_name))
    }
}

fn key(tenant_id: &str, service_name: &str) -> RecordKey {
    (tenant_id.to_owned(), service_name.to_owned())
}

impl ServiceStore for MemoryServiceStore {
    fn storage_name(&self) -> &str {
        STORAGE_NAME
    }

    fn is_alive(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn create(&self, record: ServiceRecord) -> Result<(), StoreError> {
        let mut records = self.records()?;
        let record_key = key(&record.tenant_id, record.name());
        if records.contains_key(&record_key) {
            return Err(StoreError::AlreadyExists {
                tenant_id: record.tenant_id,
                name: record.spec.name,
            });
        }
        tracing::debug!(
            tenant = %record.tenant_id,
            service = %record.name(),
            "created service record"
        );
        records.insert(record_key, record);
        Ok(())
    }

    fn get(&self, tenant_id: &str, service_name: &str) -> Result<ServiceRecord, StoreError> {
        self.with_record(tenant_id, service_name, |record| record.clone())
    }

    fn update_spec(
        &self,
        tenant_id: &str,
        service_name: &str,
        spec: ServiceSpec,
    ) -> Result<(), StoreError> {
        self.with_record(tenant_id, service_name, |record| record.spec = spec)
    }

    fn delete(&self, tenant_id: &str, service_name: &str) -> Result<(), StoreError> {
        let mut records = self.records()?;
        if records.remove(&key(tenant_id, service_name)).is_none() {
            return Err(StoreError::service_not_found(service_name));
        }
        tracing::debug!(tenant = %tenant_id, service = %service_name, "removed service record");
        Ok(())
    }

    fn list(
        &self,
        tenant_id: &str,
        marker: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<ServiceRecord>, StoreError> {
        let records = self.records()?;
        Ok(records
            .iter()
            .filter(|((tenant, name), _)| {
                tenant == tenant_id && marker.is_none_or(|after| name.as_str() > after)
            })
            .map(|(_, record)| record.clone())
            .take(limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .collect())
    }

    fn get_provider_details(
        &self,
        tenant_id: &str,
        service_name: &str,
    ) -> Result<BTreeMap<String, ProviderDetail>, StoreError> {
        self.with_record(tenant_id, service_name, |record| {
            record.provider_details.clone()
        })
    }

    fn update_provider_details(
        &self,
        tenant_id: &str,
        service_name: &str,
        details: BTreeMap<String, ProviderDetail>,
    ) -> Result<BTreeMap<String, ProviderDetail>, StoreError> {
        self.with_record(tenant_id, service_name, |record| {
            record.provider_details = details;
            tracing::debug!(
                tenant = %tenant_id,
                service = %service_name,
                providers = record.provider_details.len(),
                "persisted provider details"
            );
            record.provider_details.clone()
        })
    }

    fn record_delete_attempt(
        &self,
        tenant_id: &str,
        service_name: &str,
        attempt: DeleteAttempt,
    ) -> Result<(), StoreError> {
        self.with_record(tenant_id, service_name, |record| {
            record.last_delete_attempt = Some(attempt);
        })
    }

    fn begin_delete(
        &self,
        tenant_id: &str,
        service_name: &str,
        attempt: DeleteAttempt,
    ) -> Result<BTreeMap<String, ProviderDetail>, StoreError> {
        self.with_record(tenant_id, service_name, |record| {
            for detail in record.provider_details.values_mut() {
                detail.set_status(ProviderStatus::DeleteInProgress);
            }
            record.last_delete_attempt = Some(attempt);
            tracing::debug!(tenant = %tenant_id, service = %service_name, "delete started");
            record.provider_details.clone()
        })
    }
}

/// Fixed flavor catalogue.
#[derive(Clone, Debug, Default)]
pub struct MemoryFlavorStore {
    flavors: BTreeMap<String, Flavor>,
}

impl MemoryFlavorStore {
    /// Builds a catalogue from the given flavors.
    #[must_use]
    pub fn new(flavors: impl IntoIterator<Item = Flavor>) -> Self {
        Self {
            flavors: flavors
                .into_iter()
                .map(|flavor| (flavor.id.clone(), flavor))
                .collect(),
        }
    }
}

impl FlavorStore for MemoryFlavorStore {
    fn get(&self, flavor_id: &str) -> Result<Flavor, StoreError> {
        self.flavors
            .get(flavor_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "flavor",
                name: flavor_id.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeleteAttemptOutcome, ProviderRef};
    use chrono::Utc;
    use rstest::{fixture, rstest};

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_owned(),
            domains: Vec::new(),
            origins: Vec::new(),
            caching: Vec::new(),
            flavor_id: String::from("standard"),
        }
    }

    #[fixture]
    fn store() -> MemoryServiceStore {
        let store = MemoryServiceStore::new();
        for name in ["charlie", "alpha", "bravo", "delta"] {
            store
                .create(ServiceRecord::new("tenant-a", spec(name)))
                .expect("seed record");
        }
        store
            .create(ServiceRecord::new("tenant-b", spec("alpha")))
            .expect("seed other tenant");
        store
    }

    #[rstest]
    fn create_rejects_duplicate_names(store: MemoryServiceStore) {
        let err = store
            .create(ServiceRecord::new("tenant-a", spec("alpha")))
            .expect_err("duplicate should fail");
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[rstest]
    #[case(None, None, &["alpha", "bravo", "charlie", "delta"])]
    #[case(Some("bravo"), None, &["charlie", "delta"])]
    #[case(None, Some(2), &["alpha", "bravo"])]
    #[case(Some("alpha"), Some(1), &["bravo"])]
    #[case(Some("delta"), None, &[])]
    fn list_orders_by_name_after_marker(
        store: MemoryServiceStore,
        #[case] marker: Option<&str>,
        #[case] limit: Option<usize>,
        #[case] expected: &[&str],
    ) {
        let names: Vec<String> = store
            .list("tenant-a", marker, limit)
            .expect("list")
            .into_iter()
            .map(|record| record.spec.name)
            .collect();
        assert_eq!(names, expected);
    }

    #[rstest]
    fn list_defaults_to_ten_entries() {
        let store = MemoryServiceStore::new();
        for index in 0..12 {
            store
                .create(ServiceRecord::new("tenant", spec(&format!("svc-{index:02}"))))
                .expect("seed record");
        }
        assert_eq!(store.list("tenant", None, None).expect("list").len(), 10);
    }

    #[rstest]
    fn provider_details_replace_whole_mapping(store: MemoryServiceStore) {
        let mut details = BTreeMap::new();
        details.insert(
            String::from("Akamai"),
            ProviderDetail::provisioned("ak-1", Vec::new(), ProviderStatus::Deployed),
        );
        store
            .update_provider_details("tenant-a", "alpha", details.clone())
            .expect("first write");

        let mut replacement = BTreeMap::new();
        replacement.insert(String::from("Fastly"), ProviderDetail::failed("boom"));
        let persisted = store
            .update_provider_details("tenant-a", "alpha", replacement.clone())
            .expect("second write");

        assert_eq!(persisted, replacement);
        assert_eq!(
            store
                .get_provider_details("tenant-a", "alpha")
                .expect("read back"),
            replacement
        );
    }

    #[rstest]
    fn begin_delete_marks_details_and_attempt_together(store: MemoryServiceStore) {
        let mut details = BTreeMap::new();
        details.insert(
            String::from("Akamai"),
            ProviderDetail::provisioned("ak-1", Vec::new(), ProviderStatus::Deployed),
        );
        details.insert(String::from("Fastly"), ProviderDetail::failed("boom"));
        store
            .update_provider_details("tenant-a", "alpha", details)
            .expect("seed details");

        let persisted = store
            .begin_delete(
                "tenant-a",
                "alpha",
                DeleteAttempt {
                    attempted_at: Utc::now(),
                    outcome: DeleteAttemptOutcome::Pending,
                },
            )
            .expect("begin delete");

        let record = store.get("tenant-a", "alpha").expect("record");
        assert_eq!(record.provider_details, persisted);
        assert!(persisted.values().all(|detail| {
            detail.status() == ProviderStatus::DeleteInProgress && detail.error_info().is_none()
        }));
        assert!(matches!(
            record.last_delete_attempt.map(|attempt| attempt.outcome),
            Some(DeleteAttemptOutcome::Pending)
        ));
    }

    #[rstest]
    fn begin_delete_on_missing_record_writes_nothing(store: MemoryServiceStore) {
        let attempt = DeleteAttempt {
            attempted_at: Utc::now(),
            outcome: DeleteAttemptOutcome::Pending,
        };
        assert_eq!(
            store.begin_delete("tenant-a", "zulu", attempt),
            Err(StoreError::service_not_found("zulu"))
        );
        assert!(store.get("tenant-a", "zulu").is_err());
    }

    #[rstest]
    fn missing_records_report_not_found(store: MemoryServiceStore) {
        assert_eq!(
            store.get("tenant-b", "bravo"),
            Err(StoreError::service_not_found("bravo"))
        );
        assert!(store.delete("tenant-a", "zulu").is_err());
    }

    #[rstest]
    fn offline_store_is_unavailable(store: MemoryServiceStore) {
        store.set_online(false);
        assert!(!store.is_alive());
        assert!(matches!(
            store.get("tenant-a", "alpha"),
            Err(StoreError::Unavailable { .. })
        ));
    }

    #[rstest]
    fn flavor_lookup() {
        let flavors = MemoryFlavorStore::new([Flavor {
            id: String::from("standard"),
            providers: vec![ProviderRef {
                provider_id: String::from("akamai"),
                label: String::from("Akamai"),
            }],
        }]);
        assert_eq!(flavors.get("standard").expect("flavor").providers.len(), 1);
        assert!(matches!(
            flavors.get("premium"),
            Err(StoreError::NotFound { kind: "flavor", .. })
        ));
    }
}
