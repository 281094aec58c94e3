//! Discover bundled sample data sets and extract every record from them.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use rif_extract::samples::StaticRifResourceGroup;
use rif_extract::{
    CycleOutcome, DataSetMonitorListener, DataSetMonitorWorker, ExtractionOptions,
    InMemoryObjectStore, MetricsSink, MonitorError, ObjectStore, RifFileType, RifFilesEvent,
    RifFilesProcessor, StorageLocation,
};
use std::sync::Arc;

/// Extracts each data set it is handed and remembers what it saw
struct ExtractingListener {
    processor: RifFilesProcessor,
    records: Mutex<Vec<(RifFileType, String)>>,
    failures: Mutex<Vec<String>>,
}

#[async_trait]
impl DataSetMonitorListener for ExtractingListener {
    async fn no_data_available(&self) {}

    async fn data_available(&self, event: &RifFilesEvent) {
        for file in &event.file_events {
            let mut records = self
                .processor
                .produce_records(file.clone())
                .await
                .unwrap()
                .records;
            while let Some(result) = records.next().await {
                match result {
                    Ok(event) => self.records.lock().push((
                        event.record.file_type(),
                        event.record.identity_key().to_string(),
                    )),
                    Err(e) => self.failures.lock().push(e.to_string()),
                }
            }
        }
    }

    async fn error_occurred(&self, error: &MonitorError) {
        self.failures.lock().push(error.to_string());
    }
}

fn setup() -> (Arc<InMemoryObjectStore>, Arc<ExtractingListener>, DataSetMonitorWorker) {
    let store = Arc::new(InMemoryObjectStore::new());
    let object_store: Arc<dyn ObjectStore> = store.clone();
    let listener = Arc::new(ExtractingListener {
        processor: RifFilesProcessor::new(object_store.clone(), MetricsSink::noop()),
        records: Mutex::new(Vec::new()),
        failures: Mutex::new(Vec::new()),
    });
    let worker = DataSetMonitorWorker::new(
        object_store,
        ExtractionOptions::default(),
        listener.clone(),
        MetricsSink::noop(),
    );
    (store, listener, worker)
}

#[tokio::test]
async fn test_sample_a_extracted_in_manifest_order() {
    let (store, listener, worker) = setup();
    let timestamp = Utc.with_ymd_and_hms(2017, 3, 1, 12, 30, 0).unwrap();
    StaticRifResourceGroup::SampleA
        .upload(store.as_ref(), StorageLocation::Pending, timestamp, 0)
        .await
        .unwrap();

    let outcome = worker.run().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::DataSetProcessed { files: 5, .. }));

    assert!(listener.failures.lock().is_empty(), "{:?}", listener.failures.lock());
    let seen = listener.records.lock().clone();
    assert_eq!(
        seen.iter().map(|(t, _)| *t).collect::<Vec<_>>(),
        vec![
            RifFileType::Beneficiary,
            RifFileType::Carrier,
            RifFileType::Inpatient,
            RifFileType::Outpatient,
            RifFileType::Pde,
        ]
    );
    assert_eq!(seen[0].1, "567834");
}

#[tokio::test]
async fn test_sample_b_claim_lines_grouped() {
    let (store, listener, worker) = setup();
    let timestamp = Utc.with_ymd_and_hms(2017, 3, 2, 0, 0, 0).unwrap();
    StaticRifResourceGroup::SampleB
        .upload(store.as_ref(), StorageLocation::Pending, timestamp, 0)
        .await
        .unwrap();

    worker.run().await.unwrap();

    let seen = listener.records.lock().clone();
    assert_eq!(seen.len(), StaticRifResourceGroup::SampleB.record_count());
    let carrier_claims: Vec<&str> = seen
        .iter()
        .filter(|(t, _)| *t == RifFileType::Carrier)
        .map(|(_, id)| id.as_str())
        .collect();
    assert_eq!(carrier_claims, vec!["5500001", "5500002"]);
    assert_eq!(store.count("Completed/"), 4);
}
