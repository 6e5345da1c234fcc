//! A dead neighbor must surface as an annotated messaging error, not a hang.

use super::helpers::{init_aggregators, world};
use chainagg::{ChainError, GrowableBuffer};

#[tokio::test]
async fn test_dead_upstream_fails_length_receive() {
    let comms = world(3);
    let mut aggs = init_aggregators(&comms, 1).await;

    // Kill the tail before the first round.
    aggs[2].comm().close();

    let mut relay = aggs.remove(1);
    let mut buffer = GrowableBuffer::from_bytes(b"relay");
    let err = relay.iexchange(&mut buffer, 0).await.unwrap_err();
    match err {
        ChainError::Messaging {
            operation,
            step,
            rank,
            ..
        } => {
            assert_eq!(operation, "receive length");
            assert_eq!(step, 0);
            assert_eq!(rank, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_dead_downstream_fails_send() {
    let comms = world(2);
    let mut aggs = init_aggregators(&comms, 1).await;

    aggs[0].comm().close();

    let mut tail = aggs.remove(1);
    let mut buffer = GrowableBuffer::from_bytes(b"lost");
    let handle = tail.iexchange(&mut buffer, 0).await.unwrap();
    let err = tail.wait(handle, &mut buffer, 0).await.unwrap_err();
    assert!(
        matches!(err, ChainError::Messaging { operation: "send length", step: 0, rank: 0, .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_dead_predecessor_fails_offset_ring() {
    let comms = world(3);
    let mut aggs = init_aggregators(&comms, 1).await;

    aggs[1].comm().close();

    let mut last = aggs.remove(2);
    let mut buffer = GrowableBuffer::from_bytes(b"abc");
    let err = last
        .exchange_absolute_positions(&mut buffer)
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            ChainError::Messaging {
                operation: "receive absolute position",
                step: 1,
                ..
            }
        ),
        "unexpected error: {err}"
    );

    // The failed round released the guard: a fresh run can start.
    let restart = last.iexchange_absolute_position(&buffer, 0);
    assert!(restart.is_ok(), "guard still held: {restart:?}");
}
