use super::helpers::{init_aggregators, run_chain, world};
use chainagg::{BufferOrder, ChainError, GrowableBuffer};

#[tokio::test]
async fn test_tail_payload_reaches_sink() {
    let results = run_chain(3, 1, |mut agg| async move {
        let mut buffer = if agg.rank() == 2 {
            GrowableBuffer::from_bytes(b"ABCDEFGH")
        } else {
            GrowableBuffer::new()
        };
        agg.reset_buffers();
        for step in 0..2 {
            let handle = agg.iexchange(&mut buffer, step).await.unwrap();
            agg.wait(handle, &mut buffer, step).await.unwrap();
            agg.swap_buffers();
        }
        agg.consumer_buffer(&buffer).as_slice().to_vec()
    })
    .await;

    assert_eq!(results[0], b"ABCDEFGH");
}

#[tokio::test]
async fn test_aggregate_delivers_in_rank_order() {
    for size in [2u32, 3, 5, 8] {
        let results = run_chain(size, 1, |mut agg| async move {
            let rank = agg.rank();
            // Distinct lengths so a misrouted buffer shows up as a size error.
            let payload: Vec<u8> = vec![b'a' + rank as u8; rank as usize + 1];
            let mut buffer = GrowableBuffer::from_bytes(&payload);
            let mut seen = Vec::new();
            agg.aggregate(&mut buffer, |b| {
                seen.push(b.as_slice().to_vec());
                Ok(())
            })
            .await
            .unwrap();
            seen
        })
        .await;

        let expected: Vec<Vec<u8>> = (0..size)
            .map(|r| vec![b'a' + r as u8; r as usize + 1])
            .collect();
        assert_eq!(results[0], expected, "size {size}");
        for (rank, seen) in results.iter().enumerate().skip(1) {
            assert!(seen.is_empty(), "rank {rank} should not consume");
        }
    }
}

#[tokio::test]
async fn test_empty_contributions_pass_through() {
    let results = run_chain(4, 1, |mut agg| async move {
        let mut buffer = if agg.rank() % 2 == 1 {
            GrowableBuffer::new()
        } else {
            GrowableBuffer::from_bytes(&[agg.rank() as u8; 3])
        };
        let mut lens = Vec::new();
        agg.aggregate(&mut buffer, |b| {
            lens.push(b.position());
            Ok(())
        })
        .await
        .unwrap();
        lens
    })
    .await;
    assert_eq!(results[0], vec![3, 0, 3, 0]);
}

#[tokio::test]
async fn test_payload_larger_than_scratch_grows_receive_slot() {
    let results = run_chain(2, 1, |mut agg| async move {
        let mut buffer = if agg.rank() == 1 {
            GrowableBuffer::from_bytes(&vec![7u8; 64 * 1024])
        } else {
            GrowableBuffer::from_bytes(b"sink")
        };
        let handle = agg.iexchange(&mut buffer, 0).await.unwrap();
        let announced = handle.announced_len();
        agg.wait(handle, &mut buffer, 0).await.unwrap();
        agg.swap_buffers();
        (announced, agg.consumer_buffer(&buffer).clone(), buffer)
    })
    .await;

    let (announced, received, own) = &results[0];
    assert_eq!(*announced, 64 * 1024);
    assert_eq!(received.size(), 64 * 1024);
    assert_eq!(received.position(), 64 * 1024);
    assert!(received.as_slice().iter().all(|&b| b == 7));
    // The sink's working buffer was not the receive slot.
    assert_eq!(own.as_slice(), b"sink");
}

#[tokio::test]
async fn test_buffer_order_follows_swaps() {
    let comms = world(1);
    let mut aggs = init_aggregators(&comms, 1).await;
    let agg = &mut aggs[0];
    assert_eq!(agg.buffer_order(), BufferOrder::Default);
    agg.swap_buffers();
    assert_eq!(agg.buffer_order(), BufferOrder::Swapped);
    agg.swap_buffers();
    assert_eq!(agg.buffer_order(), BufferOrder::Default);
    agg.swap_buffers();
    agg.reset_buffers();
    assert_eq!(agg.buffer_order(), BufferOrder::Default);
}

#[tokio::test]
async fn test_single_rank_chain_is_noop() {
    let comms = world(1);
    let mut aggs = init_aggregators(&comms, 1).await;
    let agg = &mut aggs[0];
    let mut buffer = GrowableBuffer::from_bytes(b"solo");

    let handle = agg.iexchange(&mut buffer, 0).await.unwrap();
    assert_eq!(handle.in_flight(), 0);
    agg.wait(handle, &mut buffer, 0).await.unwrap();

    let mut seen = Vec::new();
    agg.aggregate(&mut buffer, |b| {
        seen.push(b.as_slice().to_vec());
        Ok(())
    })
    .await
    .unwrap();
    assert_eq!(seen, vec![b"solo".to_vec()]);
}

#[tokio::test]
async fn test_step_out_of_range_rejected() {
    let results = run_chain(2, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::new();
        agg.iexchange(&mut buffer, 2).await.map(|_| ())
    })
    .await;
    for r in results {
        assert!(matches!(r, Err(ChainError::StepOutOfRange { step: 2, size: 2 })));
    }
}

#[tokio::test]
async fn test_wait_with_wrong_step_rejected() {
    let results = run_chain(2, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::from_bytes(b"x");
        let handle = agg.iexchange(&mut buffer, 0).await.unwrap();
        agg.wait(handle, &mut buffer, 1).await
    })
    .await;
    for r in results {
        assert!(matches!(
            r,
            Err(ChainError::StepMismatch {
                issued: 0,
                waited: 1
            })
        ));
    }
}

#[tokio::test]
async fn test_consume_error_stops_cycle() {
    let results = run_chain(1, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::from_bytes(b"x");
        agg.aggregate(&mut buffer, |_| Err(ChainError::transport("sink full")))
            .await
    })
    .await;
    assert!(matches!(&results[0], Err(ChainError::Transport { .. })));
}
