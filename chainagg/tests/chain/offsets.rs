use super::helpers::{init_aggregators, run_chain, world};
use chainagg::{ChainError, GrowableBuffer, OffsetHandle};

#[tokio::test]
async fn test_offsets_are_exclusive_prefix_sums() {
    let results = run_chain(4, 1, |mut agg| async move {
        let len = [10usize, 20, 30, 40][agg.rank() as usize];
        let mut buffer = GrowableBuffer::from_bytes(&vec![0u8; len]);
        let pos = agg.exchange_absolute_positions(&mut buffer).await.unwrap();
        assert_eq!(pos, buffer.absolute_position());
        (pos, agg.stream_end())
    })
    .await;

    let positions: Vec<u64> = results.iter().map(|(p, _)| *p).collect();
    assert_eq!(positions, vec![0, 10, 30, 60]);
    assert_eq!(results[0].1, Some(100));
    assert!(results[1..].iter().all(|(_, end)| end.is_none()));
}

#[tokio::test]
async fn test_sink_seed_shifts_every_offset() {
    let results = run_chain(3, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::from_bytes(&[1u8; 5]);
        if agg.rank() == 0 {
            buffer.set_absolute_position(1000);
        }
        let pos = agg.exchange_absolute_positions(&mut buffer).await.unwrap();
        (pos, agg.stream_end())
    })
    .await;

    assert_eq!(results[0], (1000, Some(1015)));
    assert_eq!(results[1].0, 1005);
    assert_eq!(results[2].0, 1010);
}

#[tokio::test]
async fn test_offsets_ignore_unwritten_capacity() {
    let results = run_chain(2, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::new();
        buffer.resize(256).unwrap();
        buffer.write(b"abc");
        agg.exchange_absolute_positions(&mut buffer).await.unwrap()
    })
    .await;
    assert_eq!(results, vec![0, 3]);
}

#[tokio::test]
async fn test_repeated_runs_reuse_the_guard() {
    let results = run_chain(3, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::from_bytes(&[0u8; 4]);
        let first = agg.exchange_absolute_positions(&mut buffer).await.unwrap();
        let second = agg.exchange_absolute_positions(&mut buffer).await.unwrap();
        (first, second)
    })
    .await;
    assert_eq!(results, vec![(0, 0), (4, 4), (8, 8)]);
}

#[tokio::test]
async fn test_second_exchange_while_active_is_rejected() {
    let results = run_chain(2, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::from_bytes(&[0u8; 6]);
        let handle = agg.iexchange_absolute_position(&buffer, 0).unwrap();
        let second = agg.iexchange_absolute_position(&buffer, 0);
        assert!(matches!(second, Err(ChainError::ExchangeActive { .. })));

        // The first run is intact and can still finish.
        agg.wait_absolute_position(handle, &mut buffer, 0).await.unwrap();
        let handle = agg.iexchange_absolute_position(&buffer, 1).unwrap();
        agg.wait_absolute_position(handle, &mut buffer, 1).await.unwrap();
        buffer.absolute_position()
    })
    .await;
    assert_eq!(results, vec![0, 6]);
}

#[tokio::test]
async fn test_wait_without_exchange_is_rejected() {
    let results = run_chain(2, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::new();
        agg.wait_absolute_position(OffsetHandle::default(), &mut buffer, 0)
            .await
    })
    .await;
    for r in results {
        assert!(matches!(r, Err(ChainError::ExchangeNotActive { .. })));
    }
}

#[tokio::test]
async fn test_single_rank_offsets_are_local() {
    let comms = world(1);
    let mut aggs = init_aggregators(&comms, 1).await;
    let agg = &mut aggs[0];
    let mut buffer = GrowableBuffer::from_bytes(&[0u8; 9]);
    buffer.set_absolute_position(3);

    let handle = agg.iexchange_absolute_position(&buffer, 0).unwrap();
    // No guard is taken when there is nobody to talk to.
    agg.iexchange_absolute_position(&buffer, 0).unwrap();
    agg.wait_absolute_position(handle, &mut buffer, 0)
        .await
        .unwrap();

    assert_eq!(agg.exchange_absolute_positions(&mut buffer).await.unwrap(), 3);
    assert_eq!(agg.stream_end(), Some(12));
}

#[tokio::test]
async fn test_offsets_then_drain_give_consistent_layout() {
    let results = run_chain(4, 1, |mut agg| async move {
        let rank = agg.rank() as usize;
        let mut buffer = GrowableBuffer::from_bytes(&vec![rank as u8; rank * 3 + 1]);
        agg.exchange_absolute_positions(&mut buffer).await.unwrap();
        let own = buffer.absolute_position();

        let mut merged = Vec::new();
        agg.aggregate(&mut buffer, |b| {
            merged.extend_from_slice(b.as_slice());
            Ok(())
        })
        .await
        .unwrap();
        (own, merged, agg.stream_end())
    })
    .await;

    let (_, merged, end) = &results[0];
    assert_eq!(Some(merged.len() as u64), *end);
    for (rank, (offset, _, _)) in results.iter().enumerate() {
        let start = *offset as usize;
        let len = rank * 3 + 1;
        assert!(merged[start..start + len].iter().all(|&b| b == rank as u8));
    }
}

#[tokio::test]
async fn test_step_mismatch_keeps_guard_set() {
    let results = run_chain(2, 1, |mut agg| async move {
        let mut buffer = GrowableBuffer::from_bytes(&[0u8; 2]);
        let handle = agg.iexchange_absolute_position(&buffer, 0).unwrap();
        let mismatch = agg.wait_absolute_position(handle, &mut buffer, 1).await;
        let again = agg.iexchange_absolute_position(&buffer, 0);
        (mismatch, again.map(|_| ()))
    })
    .await;

    for (mismatch, again) in results {
        assert!(matches!(
            mismatch,
            Err(ChainError::StepMismatch {
                issued: 0,
                waited: 1
            })
        ));
        assert!(matches!(again, Err(ChainError::ExchangeActive { .. })));
    }
}

#[tokio::test]
async fn test_seed_overflow_is_reported() {
    let results = run_chain(2, 1, |mut agg| async move {
        if agg.rank() != 0 {
            return Vec::new();
        }
        let mut buffer = GrowableBuffer::from_bytes(&[0u8; 8]);
        buffer.set_absolute_position(u64::MAX - 4);
        // Two attempts: the failed post must not leave the guard set.
        (0..2)
            .map(|_| agg.iexchange_absolute_position(&buffer, 0).map(|_| ()))
            .collect::<Vec<_>>()
    })
    .await;

    assert_eq!(results[0].len(), 2);
    for r in &results[0] {
        assert!(matches!(
            r,
            Err(ChainError::OffsetOverflow {
                running_total,
                local_size: 8,
            }) if *running_total == u64::MAX - 4
        ));
    }
}

#[tokio::test]
async fn test_single_rank_overflow_is_reported() {
    let comms = world(1);
    let mut aggs = init_aggregators(&comms, 1).await;
    let mut buffer = GrowableBuffer::from_bytes(&[0u8; 2]);
    buffer.set_absolute_position(u64::MAX);
    let err = aggs[0]
        .exchange_absolute_positions(&mut buffer)
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::OffsetOverflow { .. }));
}
