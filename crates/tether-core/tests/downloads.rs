mod common;

use common::harness;
use tether_core::SyncError;
use tether_core::model::{Bit, BitRef};

fn bit(id: &str, size: u64, deps: &[&str]) -> Bit {
    Bit {
        id: id.to_string(),
        hub: "hub".to_string(),
        hash: format!("h-{id}"),
        dependency_tree_hash: format!("tree-{id}"),
        dependencies: deps.iter().map(|d| BitRef::new("hub", *d)).collect(),
        download_link: None,
        size_bytes: Some(size),
    }
}

fn model_pack(h: &common::Harness) -> Bit {
    h.local.register_bit(bit("tokenizer", 20, &[]));
    h.local.register_bit(bit("weights", 80, &["tokenizer"]));
    let root = bit("model", 0, &["weights", "tokenizer"]);
    h.local.register_bit(root.clone());
    root
}

#[tokio::test]
async fn pack_size_walks_the_graph_once_per_tree_hash() {
    let h = harness();
    let root = model_pack(&h);

    assert_eq!(h.engine.pack_size(&root).await.expect("size"), 100);
    assert_eq!(h.engine.pack_size(&root).await.expect("size"), 100);
    assert_eq!(h.local.calls("get_pack_from_bit"), 1);
    assert_eq!(h.engine.resolver().list_cached().expect("cached").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn download_completes_and_installs_every_artifact() {
    let h = harness();
    let root = model_pack(&h);
    h.local.schedule_download("h-weights", vec![0, 40, 80]);
    h.local.schedule_download("h-tokenizer", vec![0, 20]);

    let handle = h.engine.download(&root).await.expect("start");
    assert_eq!(handle.pack().len(), 3);

    let status = handle.wait().await.expect("download");
    assert!(status.finished);
    assert!(status.complete);
    assert_eq!(status.total_downloaded, 100);
    assert_eq!(status.total_max, 100);
    assert!((status.percent - 100.0).abs() < 1e-9);

    assert!(h.engine.is_bit_installed(&bit("weights", 80, &[])).await.expect("installed"));
    assert_eq!(h.engine.installed_bits().await.expect("installed").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn progress_is_published_while_downloading() {
    let h = harness();
    let root = model_pack(&h);
    h.local.schedule_download("h-weights", vec![0, 20, 40, 60, 80]);

    let handle = h.engine.download(&root).await.expect("start");
    let mut updates = handle.subscribe();
    let mut seen_partial = false;
    while updates.changed().await.is_ok() {
        let status = updates.borrow_and_update().clone();
        if status.total_downloaded > 0 && !status.complete {
            seen_partial = true;
            assert!(status.percent > 0.0 && status.percent < 100.0);
        }
        if status.finished {
            break;
        }
    }
    assert!(seen_partial);
}

#[tokio::test(start_paused = true)]
async fn failed_artifacts_fail_the_download() {
    let h = harness();
    let root = model_pack(&h);
    h.local.fail_download("h-tokenizer");

    let err = h.engine.download(&root).await.expect("start").wait().await.expect_err("failure");
    assert!(matches!(err, SyncError::Local(ref m) if m.contains("h-tokenizer")));
    assert!(!h.engine.is_bit_installed(&bit("tokenizer", 20, &[])).await.expect("installed"));
}

#[tokio::test(start_paused = true)]
async fn unfinished_downloads_are_resumed() {
    let h = harness();
    let root = model_pack(&h);
    h.local.mark_unfinished(root.clone());

    let handles = h.engine.resume_downloads().await.expect("resume");
    assert_eq!(handles.len(), 1);
    for handle in handles {
        assert!(handle.wait().await.expect("download").complete);
    }
    assert!(h.engine.is_bit_installed(&root).await.expect("installed"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_running_downloads() {
    let h = harness();
    let root = model_pack(&h);
    h.local.schedule_download("h-weights", vec![0, 10, 20, 30, 40, 50, 60, 70, 80]);

    let handle = h.engine.download(&root).await.expect("start");
    h.engine.shutdown().await;
    let err = handle.wait().await.expect_err("aborted");
    assert!(err.to_string().contains("aborted"));
}
