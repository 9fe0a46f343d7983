//! Gathering what the destination looks like before a stream is prepared.

use tracing::debug;

use crate::core::{DestinationHandler, DestinationInitialState, SqlGenerator, StreamConfig};
use crate::error::Result;

/// Ask the handler about `stream`'s tables and combine the answers with its
/// persisted `state`.
///
/// An absent final table is reported as empty and schema-matching.
pub async fn gather_initial_state<G, H>(
    generator: &G,
    handler: &H,
    stream: &StreamConfig,
    state: H::State,
) -> Result<DestinationInitialState<H::State>>
where
    G: SqlGenerator + ?Sized,
    H: DestinationHandler<Table = G::Table> + ?Sized,
{
    let (final_table_present, final_table_empty, schema_matches) =
        match handler.find_existing_table(&stream.id).await? {
            Some(table) => (
                true,
                handler.is_final_table_empty(&stream.id).await?,
                generator.existing_schema_matches_stream_config(stream, &table)?,
            ),
            None => (false, true, true),
        };

    let min_extracted_at_for_sync = handler.get_min_timestamp_for_sync(&stream.id).await?;
    let has_unprocessed_raw_records = handler.has_unprocessed_raw_records(&stream.id).await?;

    debug!(
        "{}: present={} empty={} schema_matches={} min_extracted_at={:?} unprocessed={} state={:?}",
        stream.id,
        final_table_present,
        final_table_empty,
        schema_matches,
        min_extracted_at_for_sync,
        has_unprocessed_raw_records,
        state
    );

    Ok(DestinationInitialState {
        stream_config: stream.clone(),
        final_table_present,
        final_table_empty,
        schema_matches,
        min_extracted_at_for_sync,
        has_unprocessed_raw_records,
        destination_state: state,
    })
}
