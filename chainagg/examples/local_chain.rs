//! Chain aggregation across 8 in-process ranks split into 2 chains.
//!
//! Every rank serializes a small record. Each chain first computes where
//! every record lands in its merged stream, then drains the records to the
//! chain sink, which prints the assembled layout.
//!
//! ```bash
//! cargo run --example local_chain
//! ```

use chainagg::{
    AggregatorConfig, ChainAggregator, Communicator, GrowableBuffer, LocalTransport, Transport,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> chainagg::Result<()> {
    let world_size = 8;
    let config = AggregatorConfig::with_sub_streams(2);
    let comms: Vec<Arc<Communicator>> = LocalTransport::mesh(world_size)
        .into_iter()
        .map(|t| Arc::new(Communicator::world(t as Arc<dyn Transport>)))
        .collect();

    let mut handles = Vec::new();
    for comm in &comms {
        let comm = Arc::clone(comm);
        let config = config.clone();
        handles.push(tokio::spawn(async move {
            let mut agg = ChainAggregator::init(&comm, &config).await?;
            let record = format!("rank{}:{}|", comm.rank(), "x".repeat(comm.rank() as usize));
            let mut buffer = GrowableBuffer::from_bytes(record.as_bytes());

            let offset = agg.exchange_absolute_positions(&mut buffer).await?;
            println!(
                "chain {} rank {} writes {} bytes at offset {offset}",
                agg.sub_stream_index(),
                agg.rank(),
                buffer.position(),
            );

            let mut merged = Vec::new();
            agg.aggregate(&mut buffer, |b| {
                merged.extend_from_slice(b.as_slice());
                Ok(())
            })
            .await?;

            if agg.is_consumer() {
                println!(
                    "chain {} sink (parent rank {}) assembled {} of {:?} bytes: {}",
                    agg.sub_stream_index(),
                    agg.consumer_rank(),
                    merged.len(),
                    agg.stream_end(),
                    String::from_utf8_lossy(&merged),
                );
            }
            Ok::<(), chainagg::ChainError>(())
        }));
    }

    for h in handles {
        h.await
            .map_err(|e| chainagg::ChainError::transport(format!("rank task failed: {e}")))??;
    }
    Ok(())
}
