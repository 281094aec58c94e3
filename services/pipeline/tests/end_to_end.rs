//! Monitor, extractor and loader wired together against in-memory stores.

use chrono::{DateTime, TimeZone, Utc};
use rif_extract::samples::StaticRifResourceGroup;
use rif_extract::{
    CycleOutcome, DataSetMonitorWorker, ExtractionOptions, InMemoryObjectStore, MetricsSink,
    ObjectStore, RifFileType, RifFilesProcessor, StorageLocation,
};
use rif_load::{InMemoryRecordStore, LoadOptions, RecordStore, RifLoader};
use rif_pipeline::{run_monitor, RifPipeline};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    objects: Arc<InMemoryObjectStore>,
    records: Arc<InMemoryRecordStore>,
    pipeline: Arc<RifPipeline>,
    monitor: DataSetMonitorWorker,
}

fn harness(options: ExtractionOptions) -> Harness {
    let objects = Arc::new(InMemoryObjectStore::new());
    let records = Arc::new(InMemoryRecordStore::new());
    let object_store: Arc<dyn ObjectStore> = objects.clone();

    let pipeline = Arc::new(RifPipeline::new(
        RifFilesProcessor::new(object_store.clone(), MetricsSink::noop()),
        RifLoader::new(LoadOptions::default(), records.clone(), MetricsSink::noop()),
    ));
    let monitor =
        DataSetMonitorWorker::new(object_store, options, pipeline.clone(), MetricsSink::noop());

    Harness {
        objects,
        records,
        pipeline,
        monitor,
    }
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 3, 1, hour, 0, 0).unwrap()
}

#[tokio::test]
async fn test_sample_a_loaded_and_moved() {
    let h = harness(ExtractionOptions::default());
    StaticRifResourceGroup::SampleA
        .upload(h.objects.as_ref(), StorageLocation::Pending, at(12), 0)
        .await
        .unwrap();

    let outcome = h.monitor.run().await.unwrap();
    assert!(matches!(
        outcome,
        CycleOutcome::DataSetProcessed { files: 5, objects_moved: 6, .. }
    ));

    let stats = h.pipeline.stats();
    assert_eq!(stats.data_sets(), 1);
    assert_eq!(
        stats.records_inserted(),
        StaticRifResourceGroup::SampleA.record_count() as u64
    );
    assert_eq!(stats.records_failed(), 0);
    assert_eq!(h.records.len(), StaticRifResourceGroup::SampleA.record_count());
    for file_type in RifFileType::ALL {
        assert_eq!(h.records.count(file_type).await.unwrap(), 1);
    }

    assert_eq!(h.objects.count("Pending/"), 0);
    assert_eq!(h.objects.count("Completed/"), 6);

    assert_eq!(h.monitor.run().await.unwrap(), CycleOutcome::NoDataAvailable);
    assert_eq!(stats.cycles_without_data(), 1);
}

#[tokio::test]
async fn test_reprocessed_data_set_updates_instead_of_duplicating() {
    let h = harness(ExtractionOptions::default());
    let group = StaticRifResourceGroup::SampleB;

    group
        .upload(h.objects.as_ref(), StorageLocation::Pending, at(12), 0)
        .await
        .unwrap();
    h.monitor.run().await.unwrap();
    let stored = h.records.snapshot();

    // Same data set discovered again, as after an interrupted move
    group
        .upload(h.objects.as_ref(), StorageLocation::Pending, at(12), 0)
        .await
        .unwrap();
    h.monitor.run().await.unwrap();

    let stats = h.pipeline.stats();
    assert_eq!(stats.records_inserted(), group.record_count() as u64);
    assert_eq!(stats.records_updated(), group.record_count() as u64);
    assert_eq!(h.records.snapshot(), stored);
}

#[tokio::test]
async fn test_filtered_pipeline_leaves_other_data_sets_pending() {
    let h = harness(ExtractionOptions::default().with_filter(RifFileType::Pde));
    StaticRifResourceGroup::SampleA
        .upload(h.objects.as_ref(), StorageLocation::Pending, at(12), 0)
        .await
        .unwrap();

    assert_eq!(h.monitor.run().await.unwrap(), CycleOutcome::NoDataAvailable);
    assert!(h.records.is_empty());
    assert_eq!(h.objects.count("Pending/"), 6);
    assert_eq!(h.objects.count("Completed/"), 0);
}

#[tokio::test]
async fn test_run_monitor_stops_after_shutdown() {
    let h = harness(ExtractionOptions::default());
    StaticRifResourceGroup::SampleA
        .upload(h.objects.as_ref(), StorageLocation::Pending, at(12), 0)
        .await
        .unwrap();
    StaticRifResourceGroup::SampleB
        .upload(h.objects.as_ref(), StorageLocation::Pending, at(13), 0)
        .await
        .unwrap();

    // Shutdown is already requested: exactly one cycle runs
    run_monitor(&h.monitor, Duration::from_secs(3600), async {}).await;

    assert_eq!(h.pipeline.stats().data_sets(), 1);
    assert_eq!(h.objects.count("Pending/"), 4);
}
