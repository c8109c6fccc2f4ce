use crate::*;

use gattlink_core::config::{EmptyPayloadPolicy, ExhaustedRetryPolicy};
use gattlink_services::{TransferError, TransferOutcome};

/// 45 bytes: raw lead, tag 0 with 19 bytes, tag 1 with 6 bytes.
#[tokio::test(start_paused = true)]
async fn test_forty_five_bytes_in_three_packets() {
    let h = start_default();
    let data = payload(45);

    let report = h.link.request_send(data.clone()).unwrap().outcome().await.unwrap();
    assert_eq!(report.outcome, TransferOutcome::Delivered);
    assert_eq!(report.packets, 3);
    assert_eq!(report.ack_timeouts, 0);

    let packets = h.peripheral.take_received();
    let sizes: Vec<_> = packets.iter().map(|p| p.len()).collect();
    assert_eq!(sizes, vec![20, 20, 7]);
    assert_eq!(packets[0][..], data[..20]);
    assert_eq!(packets[1][0], 0);
    assert_eq!(packets[2][0], 1);
    assert_eq!(reassemble(&packets, 45, h.packet_size).unwrap(), data);
}

#[tokio::test(start_paused = true)]
async fn test_exact_packet_size_needs_no_tag() {
    let h = start_default();
    let data = payload(20);

    let report = h.link.request_send(data.clone()).unwrap().outcome().await.unwrap();
    assert!(report.is_delivered());

    let packets = h.peripheral.take_received();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0][..], data[..]);
}

#[tokio::test(start_paused = true)]
async fn test_empty_payload_send_and_reject() {
    let h = start_default();
    let report = h.link.request_send(Vec::new()).unwrap().outcome().await.unwrap();
    assert!(report.is_delivered());
    let packets = h.peripheral.take_received();
    assert_eq!(packets.len(), 1);
    assert!(packets[0].is_empty());

    let mut config = GattlinkConfig::default();
    config.transfer.empty_payload = EmptyPayloadPolicy::Reject;
    let h = start(&config);
    let report = h.link.request_send(Vec::new()).unwrap().outcome().await.unwrap();
    assert_eq!(report.outcome, TransferOutcome::Rejected);
    assert!(h.peripheral.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_refused_writes_are_retried_transparently() {
    let h = start_default();
    // lead refused once, tag 0 refused twice
    h.peripheral.script([false, true, false, false]);
    let data = payload(60);

    let report = h.link.request_send(data.clone()).unwrap().outcome().await.unwrap();
    assert!(report.is_delivered());
    assert_eq!(report.retries, 3);
    assert_eq!(report.unretried_failures, 0);

    let packets = h.peripheral.take_received();
    assert_eq!(reassemble(&packets, 60, h.packet_size).unwrap(), data);
    let refused = h.log.packets.lock().unwrap().iter().filter(|(_, ok)| !ok).count();
    assert_eq!(refused, 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_degrades_and_loses_bytes() {
    let h = start_default();
    // three retries spent on the lead, then tag 0 is refused for good
    h.peripheral.script([false, false, false, true, false]);
    let data = payload(45);

    let report = h.link.request_send(data).unwrap().outcome().await.unwrap();
    assert_eq!(report.outcome, TransferOutcome::Degraded);
    assert_eq!(report.retries, 3);
    assert_eq!(report.unretried_failures, 1);
    assert_eq!(report.packets, 3);

    // the peer sees a gap in the tags
    let packets = h.peripheral.take_received();
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[1][0], 1);
    assert!(reassemble(&packets, 45, h.packet_size).is_err());
    assert_eq!(h.tracker.stats().degraded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_policy_stops_the_payload() {
    let mut config = GattlinkConfig::default();
    config.transfer.exhausted_retries = ExhaustedRetryPolicy::Abort;
    config.loopback.reject_probability = 1.0;
    let h = start(&config);

    let report = h.link.request_send(payload(100)).unwrap().outcome().await.unwrap();
    assert_eq!(report.outcome, TransferOutcome::Aborted);
    assert_eq!(report.submissions, 4);
    assert!(h.peripheral.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_channel_is_reported() {
    let h = start_default();
    h.peripheral.set_ready(false);

    let report = h.link.request_send(payload(10)).unwrap().outcome().await.unwrap();
    assert_eq!(report.outcome, TransferOutcome::ChannelUnavailable);
    assert_eq!(report.submissions, 0);

    h.peripheral.set_ready(true);
    let report = h.link.request_send(payload(10)).unwrap().outcome().await.unwrap();
    assert!(report.is_delivered());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_sends_nothing() {
    let h = start_default();
    let ticket = h.link.request_send(payload(45)).unwrap();
    ticket.cancel();

    let report = ticket.outcome().await.unwrap();
    assert_eq!(report.outcome, TransferOutcome::Cancelled);
    assert!(h.peripheral.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sequence_tag_wraps_past_255() {
    let h = start_default();
    let data = payload(20 + 300 * 19);

    let report = h.link.request_send(data.clone()).unwrap().outcome().await.unwrap();
    assert!(report.is_delivered());
    assert_eq!(report.packets, 301);

    let packets = h.peripheral.take_received();
    assert_eq!(packets[256][0], 255);
    assert_eq!(packets[257][0], 0);
    assert_eq!(reassemble(&packets, data.len(), h.packet_size).unwrap(), data);
}

#[tokio::test(start_paused = true)]
async fn test_larger_packet_size_from_config() {
    let mut config = GattlinkConfig::default();
    config.link.packet_size = 64;
    let h = start(&config);
    let data = payload(200);

    let report = h.link.request_send(data.clone()).unwrap().outcome().await.unwrap();
    assert!(report.is_delivered());

    let packets = h.peripheral.take_received();
    assert!(packets.iter().all(|p| p.len() <= 64));
    assert_eq!(reassemble(&packets, 200, 64).unwrap(), data);
}

#[tokio::test(start_paused = true)]
async fn test_report_json_shape() {
    let h = start_default();
    let report = h.link.request_send(payload(45)).unwrap().outcome().await.unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["outcome"], "delivered");
    assert_eq!(json["bytes"], 45);
    assert_eq!(json["packets"], 3);
    assert!(json["elapsed_us"].is_number());
}

#[tokio::test(start_paused = true)]
async fn test_link_closed_after_worker_exit() {
    let h = start_default();
    h.shutdown.send(()).unwrap();
    h.worker.await.unwrap().unwrap();

    assert!(h.link.is_closed());
    assert_eq!(
        h.link.request_send(payload(1)).unwrap_err(),
        TransferError::LinkClosed
    );
}
