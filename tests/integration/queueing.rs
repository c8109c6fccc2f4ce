use crate::*;

use std::time::Duration;

use gattlink_services::{TransferError, TransferOutcome};
use tokio::time::Instant;

/// Two payloads requested back to back: the second waits for the first.
#[tokio::test(start_paused = true)]
async fn test_back_to_back_payloads_are_serialized() {
    let h = start_default();
    let first = payload(45);
    let second: Vec<u8> = payload(45).into_iter().rev().collect();

    let a = h.link.request_send(first.clone()).unwrap();
    let b = h.link.request_send(second.clone()).unwrap();
    let (a_id, b_id) = (a.id(), b.id());

    assert!(a.outcome().await.unwrap().is_delivered());
    assert!(b.outcome().await.unwrap().is_delivered());

    let order: Vec<_> = h.log.packets.lock().unwrap().iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![a_id, a_id, a_id, b_id, b_id, b_id]);

    let packets = h.peripheral.take_received();
    assert_eq!(reassemble(&packets[..3], 45, h.packet_size).unwrap(), first);
    assert_eq!(reassemble(&packets[3..], 45, h.packet_size).unwrap(), second);
}

#[tokio::test(start_paused = true)]
async fn test_backlog_is_first_in_first_out() {
    let h = start_default();

    let tickets: Vec<_> = (0..5)
        .map(|i| h.link.request_send(payload(10 + i * 15)).unwrap())
        .collect();
    let ids: Vec<_> = tickets.iter().map(|t| t.id()).collect();

    for ticket in tickets {
        assert!(ticket.outcome().await.unwrap().is_delivered());
    }
    assert_eq!(*h.log.finished.lock().unwrap(), ids);
    assert_eq!(h.tracker.stats().delivered, 5);
}

#[tokio::test(start_paused = true)]
async fn test_requests_arriving_mid_transfer_wait_their_turn() {
    let h = start_default();
    let a = h.link.request_send(payload(20 * 19)).unwrap();

    // let the first transfer get going before the next request shows up
    tokio::time::sleep(Duration::from_millis(3)).await;
    let b = h.link.request_send(payload(5)).unwrap();
    let b_id = b.id();

    let a_report = a.outcome().await.unwrap();
    assert!(a_report.is_delivered());
    assert!(b.outcome().await.unwrap().is_delivered());

    let packets = h.log.packets.lock().unwrap().clone();
    let first_b = packets.iter().position(|(id, _)| *id == b_id).unwrap();
    assert_eq!(first_b, a_report.submissions as usize);
}

#[tokio::test(start_paused = true)]
async fn test_backlog_gap_spaces_queued_payloads() {
    let mut config = GattlinkConfig::default();
    config.queue.backlog_gap_ms = 100;
    let h = start(&config);

    let started = Instant::now();
    let a = h.link.request_send(payload(5)).unwrap();
    let b = h.link.request_send(payload(5)).unwrap();

    a.outcome().await.unwrap();
    let first_done = started.elapsed();
    b.outcome().await.unwrap();
    assert!(started.elapsed() >= first_done + Duration::from_millis(100));
}

/// With one slot parked in the worker and one in the channel, further
/// requests are refused while a long payload is still going out.
#[tokio::test(start_paused = true)]
async fn test_backlog_is_bounded_while_a_transfer_is_in_flight() {
    let mut config = GattlinkConfig::default();
    config.queue.request_capacity = 1;
    let h = start(&config);

    let first = h.link.request_send(payload(4000)).unwrap();

    let mut accepted = Vec::new();
    let mut refused = 0;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(1)).await;
        match h.link.request_send(payload(5)) {
            Ok(ticket) => accepted.push(ticket),
            Err(TransferError::QueueFull) => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(accepted.len(), 2);
    assert_eq!(refused, 18);

    let report = first.outcome().await.unwrap();
    assert!(report.is_delivered());
    assert!(report.elapsed > Duration::from_millis(20));
    for ticket in accepted {
        assert!(ticket.outcome().await.unwrap().is_delivered());
    }

    // room again once the backlog has drained
    assert!(h.link.request_send(payload(5)).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_the_backlog() {
    let mut config = GattlinkConfig::default();
    config.queue.backlog_gap_ms = 60_000;
    let h = start(&config);

    let a = h.link.request_send(payload(5)).unwrap();
    let b = h.link.request_send(payload(5)).unwrap();
    let c = h.link.request_send(payload(5)).unwrap();
    assert!(a.outcome().await.unwrap().is_delivered());

    h.shutdown.send(()).unwrap();
    assert_eq!(b.outcome().await.unwrap().outcome, TransferOutcome::Cancelled);
    assert_eq!(c.outcome().await.unwrap().outcome, TransferOutcome::Cancelled);
    h.worker.await.unwrap().unwrap();

    let stats = h.tracker.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.cancelled, 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_transfer_stops_at_packet_boundary() {
    let h = start_default();
    let ticket = h.link.request_send(payload(20 * 19)).unwrap();

    tokio::time::sleep(Duration::from_millis(3)).await;
    h.shutdown.send(()).unwrap();

    let report = ticket.outcome().await.unwrap();
    assert_eq!(report.outcome, TransferOutcome::Cancelled);
    assert!(report.packets > 0);
    assert!(report.packets < 20);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_link_drains_then_exits() {
    let Harness {
        link,
        peripheral,
        worker,
        shutdown: _shutdown,
        ..
    } = start_default();

    let tickets: Vec<_> = (0..3).map(|_| link.request_send(payload(30)).unwrap()).collect();
    drop(link);

    worker.await.unwrap().unwrap();
    for ticket in tickets {
        assert!(ticket.outcome().await.unwrap().is_delivered());
    }
    assert_eq!(peripheral.received().len(), 6);
}
