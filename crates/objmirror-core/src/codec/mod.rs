//! Codec pipeline
//!
//! Transfers that transform their payload run it through an ordered list of
//! incremental [`Codec`] stages: an optional source decode, the record
//! codec, schema validation, and an optional destination encode. Stages
//! receive chunks as they arrive and are finished in order, so memory stays
//! bounded to one codec window per stream (the CSV and LZ4 decoders are the
//! documented exceptions; they must see the whole stream).

mod gzip;
mod lz4;
mod records;

pub use gzip::{GzipDecoder, GzipEncoder};
pub use lz4::{Lz4Decoder, Lz4Encoder};
pub use records::{CsvToNdjsonCodec, NdjsonToCsvCodec, SchemaCodec};

use objmirror_common::{url, Result};

use crate::config::rule::{Compression, RecordCodec, Rule};

/// One incremental transform stage
pub trait Codec: Send {
    /// Feed a chunk, returning whatever output it completes
    fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>>;

    /// Flush trailer bytes; the stage accepts no further input
    fn finish(&mut self) -> Result<Vec<u8>>;
}

/// Ordered list of codec stages
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Codec>>,
}

impl Pipeline {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn push(&mut self, stage: Box<dyn Codec>) {
        self.stages.push(stage);
    }

    /// Run a chunk through every stage in order
    pub fn transform(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        let mut stages = self.stages.iter_mut();
        let mut data = match stages.next() {
            Some(stage) => stage.transform(chunk)?,
            None => return Ok(chunk.to_vec()),
        };
        for stage in stages {
            data = stage.transform(&data)?;
        }
        Ok(data)
    }

    /// Finish every stage in order, cascading each trailer through the
    /// stages after it
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for index in 0..self.stages.len() {
            let mut tail = self.stages[index].finish()?;
            for stage in self.stages[index + 1..].iter_mut() {
                tail = stage.transform(&tail)?;
            }
            out.extend(tail);
        }
        Ok(out)
    }
}

fn decoder(compression: Compression) -> Option<Box<dyn Codec>> {
    match compression {
        Compression::None => None,
        Compression::Gzip => Some(Box::new(GzipDecoder::new())),
        Compression::Lz4 => Some(Box::new(Lz4Decoder::new())),
    }
}

fn encoder(compression: Compression) -> Option<Box<dyn Codec>> {
    match compression {
        Compression::None => None,
        Compression::Gzip => Some(Box::new(GzipEncoder::new())),
        Compression::Lz4 => Some(Box::new(Lz4Encoder::new())),
    }
}

fn record_stage(rule: &Rule) -> Option<Box<dyn Codec>> {
    match rule.codec {
        RecordCodec::Passthrough => None,
        RecordCodec::NdjsonToCsv => Some(Box::new(NdjsonToCsvCodec::new())),
        RecordCodec::CsvToNdjson => Some(Box::new(CsvToNdjsonCodec::new())),
        RecordCodec::SchemaCoerce => rule
            .schema
            .clone()
            .map(|schema| Box::new(SchemaCodec::new(schema, true)) as Box<dyn Codec>),
    }
}

/// The transform plan for one source object under one rule
pub struct TransferPlan {
    pub pipeline: Pipeline,
    /// Whether the source payload gets decoded before the record stages
    pub decoded: bool,
    /// Whether the destination payload gets a compression encode
    pub encoded: bool,
}

impl TransferPlan {
    /// A plan with no stages transfers bytes untouched
    pub fn is_identity(&self) -> bool {
        self.pipeline.is_empty()
    }
}

fn decode_needed(rule: &Rule, source: Compression) -> bool {
    if source.is_none() {
        return false;
    }
    rule.needs_records() || (!rule.compression.is_none() && source != rule.compression)
}

fn encode_needed(rule: &Rule, source: Compression, decoded: bool) -> bool {
    !rule.compression.is_none() && (decoded || source.is_none())
}

/// Build the full streamed-transform plan for a rule and source object name
pub fn plan(rule: &Rule, source_name: &str) -> TransferPlan {
    let source = Compression::from_file_name(source_name);
    let decoded = decode_needed(rule, source);
    let encoded = encode_needed(rule, source, decoded);

    let mut pipeline = Pipeline::empty();
    if decoded {
        if let Some(stage) = decoder(source) {
            pipeline.push(stage);
        }
    }
    schema_and_record_stages(rule, &mut pipeline);
    if encoded {
        if let Some(stage) = encoder(rule.compression) {
            pipeline.push(stage);
        }
    }
    TransferPlan {
        pipeline,
        decoded,
        encoded,
    }
}

/// Decode-only pipeline for the partitioned path
pub fn decode_pipeline(source_name: &str) -> Pipeline {
    let mut pipeline = Pipeline::empty();
    if let Some(stage) = decoder(Compression::from_file_name(source_name)) {
        pipeline.push(stage);
    }
    pipeline
}

/// Per-part pipeline for the partitioned path: record codec, schema check,
/// destination encode. The source decode already happened upstream of the
/// partitioner.
pub fn part_pipeline(rule: &Rule) -> Pipeline {
    let mut pipeline = Pipeline::empty();
    schema_and_record_stages(rule, &mut pipeline);
    if let Some(stage) = encoder(rule.compression) {
        pipeline.push(stage);
    }
    pipeline
}

fn schema_and_record_stages(rule: &Rule, pipeline: &mut Pipeline) {
    // Validation runs on NDJSON records: before an ndjson-to-csv conversion,
    // after a csv-to-ndjson one. schema-coerce validates as it rewrites.
    let validate = rule
        .schema
        .clone()
        .filter(|_| rule.codec != RecordCodec::SchemaCoerce)
        .map(|schema| Box::new(SchemaCodec::new(schema, false)) as Box<dyn Codec>);
    match rule.codec {
        RecordCodec::CsvToNdjson => {
            if let Some(stage) = record_stage(rule) {
                pipeline.push(stage);
            }
            if let Some(stage) = validate {
                pipeline.push(stage);
            }
        }
        _ => {
            if let Some(stage) = validate {
                pipeline.push(stage);
            }
            if let Some(stage) = record_stage(rule) {
                pipeline.push(stage);
            }
        }
    }
}

/// Default destination object name for a rule and source name
///
/// Used when the rule has no destination template: the source name with the
/// transform's extension changes applied (compression suffix stripped after
/// a decode, format extension swapped by a record codec, target compression
/// suffix appended after an encode).
pub fn destination_name(rule: &Rule, source_name: &str) -> String {
    let source = Compression::from_file_name(source_name);
    let decoded = decode_needed(rule, source);
    let encoded = encode_needed(rule, source, decoded);

    let mut name = source_name.to_string();
    if decoded {
        name = url::file_stem(&name).to_string();
    }
    match rule.codec {
        RecordCodec::NdjsonToCsv => name = swap_extension(&name, "csv"),
        RecordCodec::CsvToNdjson => name = swap_extension(&name, "ndjson"),
        _ => {}
    }
    if encoded {
        if let Some(suffix) = rule.compression.suffix() {
            name = format!("{}.{}", name, suffix);
        }
    }
    name
}

fn swap_extension(name: &str, ext: &str) -> String {
    format!("{}.{}", url::file_stem(name), ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rule::{SchemaField, FieldKind, Schema};

    fn rule_with(compression: Compression, codec: RecordCodec) -> Rule {
        let mut rule = Rule::simple("mem://src", "mem://dst");
        rule.compression = compression;
        rule.codec = codec;
        rule
    }

    fn run(pipeline: &mut Pipeline, input: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in input.chunks(chunk_size) {
            out.extend(pipeline.transform(chunk).unwrap());
        }
        out.extend(pipeline.finish().unwrap());
        out
    }

    #[test]
    fn test_plain_copy_is_identity() {
        let rule = rule_with(Compression::None, RecordCodec::Passthrough);
        assert!(plan(&rule, "a.txt").is_identity());
    }

    #[test]
    fn test_same_compression_is_identity() {
        let rule = rule_with(Compression::Gzip, RecordCodec::Passthrough);
        let p = plan(&rule, "a.json.gz");
        assert!(p.is_identity());
        assert_eq!(destination_name(&rule, "a.json.gz"), "a.json.gz");
    }

    #[test]
    fn test_compression_appends_suffix() {
        let rule = rule_with(Compression::Gzip, RecordCodec::Passthrough);
        let p = plan(&rule, "big.bin");
        assert!(!p.decoded);
        assert!(p.encoded);
        assert_eq!(destination_name(&rule, "big.bin"), "big.bin.gz");
    }

    #[test]
    fn test_transcode_decodes_then_encodes() {
        let rule = rule_with(Compression::Lz4, RecordCodec::Passthrough);
        let p = plan(&rule, "a.json.gz");
        assert!(p.decoded);
        assert!(p.encoded);
        assert_eq!(destination_name(&rule, "a.json.gz"), "a.json.lz4");
    }

    #[test]
    fn test_record_codec_swaps_extension() {
        let rule = rule_with(Compression::None, RecordCodec::NdjsonToCsv);
        assert_eq!(destination_name(&rule, "events.ndjson"), "events.csv");
        let rule = rule_with(Compression::Gzip, RecordCodec::NdjsonToCsv);
        assert_eq!(destination_name(&rule, "events.ndjson.gz"), "events.csv.gz");
    }

    #[test]
    fn test_pipeline_gzip_round_trip_through_plan() {
        let rule = rule_with(Compression::Gzip, RecordCodec::Passthrough);
        let mut encode = plan(&rule, "a.txt").pipeline;
        let input = b"pipeline payload\n".repeat(1000);
        let compressed = run(&mut encode, &input, 97);

        let mut decode = decode_pipeline("a.txt.gz");
        let restored = run(&mut decode, &compressed, 113);
        assert_eq!(restored, input);
    }

    #[test]
    fn test_schema_then_encode_cascades_finish() {
        let mut rule = rule_with(Compression::Gzip, RecordCodec::Passthrough);
        rule.schema = Some(Schema {
            fields: vec![SchemaField {
                name: "id".to_string(),
                kind: FieldKind::Integer,
            }],
        });
        let mut pipeline = plan(&rule, "data.ndjson").pipeline;
        let input = b"{\"id\":1}\n{\"id\":2}";
        let compressed = run(&mut pipeline, input, 3);

        let mut decode = decode_pipeline("data.ndjson.gz");
        let restored = run(&mut decode, &compressed, 64);
        assert_eq!(restored, input);
    }
}
