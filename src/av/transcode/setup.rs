use super::filter::{FilterGraph, InputFilter, OutputFilter};
use super::{InterruptHandle, TranscodeStats, Transcoder};
use crate::av::{MediaEngine, MediaType};
use crate::codec::{OutputSource, OutputStream, PadRef, StreamRef, VsyncMethod};
use crate::config::{
    ComplexGraphConfig, InputFileConfig, OutputFileConfig, OutputStreamConfig, StreamCodec,
    StreamSource, TranscodeJob, TranscodeOptions,
};
use crate::error::{Result, TranscodeError};
use crate::format::{InputFile, OutputFile};

impl Transcoder {
    /// Opens every file of the job, binds streams to filter graphs and
    /// opens the decoders that are needed. Nothing is read yet.
    pub fn new(job: TranscodeJob, mut engine: Box<dyn MediaEngine>) -> Result<Self> {
        let TranscodeJob {
            options,
            inputs: input_configs,
            graphs: graph_configs,
            outputs: output_configs,
        } = job;

        if output_configs.is_empty() {
            return Err(TranscodeError::Config(
                "at least one output file must be specified".into(),
            ));
        }

        let mut inputs = input_configs
            .iter()
            .enumerate()
            .map(|(i, config)| InputFile::open(i, config, engine.as_mut(), &options))
            .collect::<Result<Vec<_>>>()?;

        let mut graphs = Vec::with_capacity(graph_configs.len());
        for (g, config) in graph_configs.iter().enumerate() {
            graphs.push(init_complex_graph(g, config, engine.as_mut(), &mut inputs)?);
        }

        let mut outputs = Vec::with_capacity(output_configs.len());
        for (o, config) in output_configs.iter().enumerate() {
            let mut file = OutputFile::open(o, config, engine.as_mut())?;
            for (s, stream) in config.streams.iter().enumerate() {
                let ost = new_output_stream(
                    StreamRef::new(o, s),
                    stream,
                    &mut Binding {
                        engine: engine.as_mut(),
                        inputs: &mut inputs,
                        graphs: &mut graphs,
                    },
                )?;
                file.streams.push(ost);
            }
            if file.streams.is_empty() {
                return Err(TranscodeError::Config(format!(
                    "output file #{} ({}) does not contain any stream",
                    o, config.url
                )));
            }
            resolve_vsync(&mut file, config, &options, &inputs, &input_configs);
            outputs.push(file);
        }

        for graph in &graphs {
            if let Some(ofilter) = graph.outputs.iter().find(|ofilter| ofilter.target.is_none()) {
                return Err(TranscodeError::Config(format!(
                    "filter graph {} output '{}' is not connected to any output stream",
                    graph.index,
                    ofilter.label.as_deref().unwrap_or(&ofilter.name)
                )));
            }
        }

        for file in &mut inputs {
            for ist in file.streams.iter_mut().filter(|ist| ist.decoding_needed) {
                let decoder = engine.open_decoder(&ist.info)?.ok_or_else(|| {
                    TranscodeError::DecoderNotFound {
                        file: ist.file_index,
                        stream: ist.index,
                        codec: ist.info.params.codec.clone(),
                    }
                })?;
                ist.decoder = Some(decoder);
            }
            file.update_enabled_start_time();
        }

        let stats = TranscodeStats::new(options.dup_warning);
        Ok(Self {
            options,
            engine,
            inputs,
            graphs,
            outputs,
            stats,
            interrupt: InterruptHandle::default(),
        })
    }
}

/// Parses a complex graph and binds its input pads to input streams.
///
/// A pad labelled `F:S` takes stream `S` of input file `F`; any other pad
/// takes the first unused stream of its media type.
fn init_complex_graph(
    index: usize,
    config: &ComplexGraphConfig,
    engine: &mut dyn MediaEngine,
    inputs: &mut [InputFile],
) -> Result<FilterGraph> {
    let pads = engine.filters().parse(&config.description)?;
    let mut graph = FilterGraph::new(index, &config.description, false);

    for (p, pad) in pads.inputs.iter().enumerate() {
        let source = match pad.label.as_deref().and_then(parse_stream_label) {
            Some((file, stream)) => {
                let exists = inputs
                    .get(file)
                    .map_or(false, |input| stream < input.streams.len());
                if !exists {
                    return Err(TranscodeError::Config(format!(
                        "filter graph {} input '{}' refers to a nonexistent stream",
                        index,
                        pad.label.as_deref().unwrap_or_default()
                    )));
                }
                StreamRef::new(file, stream)
            }
            None => {
                let wanted = pad.media_type.unwrap_or(MediaType::Video);
                inputs
                    .iter()
                    .flat_map(|input| input.streams.iter())
                    .find(|ist| ist.media_type() == wanted && ist.filters.is_empty() && ist.discard)
                    .map(|ist| StreamRef::new(ist.file_index, ist.index))
                    .ok_or_else(|| {
                        TranscodeError::Config(format!(
                            "no unused {} input stream for filter graph {} input {}",
                            wanted, index, p
                        ))
                    })?
            }
        };

        let ist = &mut inputs[source.file].streams[source.stream];
        ist.discard = false;
        ist.decoding_needed = true;
        ist.filters.push(PadRef::new(index, p));
        graph.inputs.push(InputFilter::new(
            format!("graph {} input from stream {}:{}", index, source.file, source.stream),
            pad.label.clone(),
            ist.media_type(),
            source,
        ));
    }

    for (p, pad) in pads.outputs.iter().enumerate() {
        graph.outputs.push(OutputFilter::new(
            format!("out_{}_{}", index, p),
            pad.label.clone(),
            pad.media_type.unwrap_or(MediaType::Video),
        ));
    }

    log::debug!(
        "filter graph {} has {} input(s) and {} output(s)",
        index,
        graph.inputs.len(),
        graph.outputs.len()
    );
    Ok(graph)
}

fn parse_stream_label(label: &str) -> Option<(usize, usize)> {
    let (file, stream) = label.split_once(':')?;
    Some((file.parse().ok()?, stream.parse().ok()?))
}

/// Shared state touched while output streams are bound to their sources.
struct Binding<'a> {
    engine: &'a mut dyn MediaEngine,
    inputs: &'a mut Vec<InputFile>,
    graphs: &'a mut Vec<FilterGraph>,
}

fn check_encoder(engine: &dyn MediaEngine, target: StreamRef, codec: &str) -> Result<()> {
    if engine.has_encoder(codec) {
        return Ok(());
    }
    Err(TranscodeError::EncoderNotFound {
        file: target.file,
        stream: target.stream,
        codec: codec.to_string(),
    })
}

fn new_output_stream(
    target: StreamRef,
    config: &OutputStreamConfig,
    binding: &mut Binding<'_>,
) -> Result<OutputStream> {
    match &config.source {
        StreamSource::Input { file, stream } => {
            let source = StreamRef::new(*file, *stream);
            let ist = binding
                .inputs
                .get_mut(*file)
                .and_then(|input| input.streams.get_mut(*stream))
                .ok_or_else(|| {
                    TranscodeError::Config(format!(
                        "output stream #{}:{} maps nonexistent input stream {}:{}",
                        target.file, target.stream, file, stream
                    ))
                })?;
            ist.discard = false;
            let media_type = ist.media_type();

            match &config.codec {
                StreamCodec::Copy => {
                    ist.copy_targets.push(target);
                    Ok(OutputStream::new(
                        target.file,
                        target.stream,
                        media_type,
                        OutputSource::Copy(source),
                        config,
                    ))
                }
                StreamCodec::Encode(codec) => {
                    check_encoder(&*binding.engine, target, codec)?;
                    let g = binding.graphs.len();
                    let description = config.filter.clone().unwrap_or_else(|| {
                        match media_type {
                            MediaType::Audio => "anull",
                            _ => "null",
                        }
                        .to_string()
                    });
                    let mut graph = FilterGraph::new(g, &description, true);
                    graph.inputs.push(InputFilter::new(
                        format!("graph {} input from stream {}:{}", g, file, stream),
                        None,
                        media_type,
                        source,
                    ));
                    let mut ofilter = OutputFilter::new(
                        format!("out_{}_{}", target.file, target.stream),
                        None,
                        media_type,
                    );
                    ofilter.target = Some(target);
                    graph.outputs.push(ofilter);
                    binding.graphs.push(graph);

                    ist.decoding_needed = true;
                    ist.filters.push(PadRef::new(g, 0));

                    let mut ost = OutputStream::new(
                        target.file,
                        target.stream,
                        media_type,
                        OutputSource::Filter(PadRef::new(g, 0)),
                        config,
                    );
                    ost.source_stream = Some(source);
                    Ok(ost)
                }
            }
        }
        StreamSource::Filter { graph, label } => {
            let codec = match &config.codec {
                StreamCodec::Encode(codec) => codec,
                StreamCodec::Copy => {
                    return Err(TranscodeError::Config(format!(
                        "stream copy requested for output stream #{}:{}, which is fed from a filter graph",
                        target.file, target.stream
                    )))
                }
            };
            check_encoder(&*binding.engine, target, codec)?;
            let fg = binding
                .graphs
                .get_mut(*graph)
                .filter(|fg| !fg.simple)
                .ok_or_else(|| {
                    TranscodeError::Config(format!("filter graph {} does not exist", graph))
                })?;
            let pad = fg
                .outputs
                .iter()
                .position(|ofilter| {
                    ofilter.target.is_none() && (label.is_none() || ofilter.label == *label)
                })
                .ok_or_else(|| {
                    TranscodeError::Config(format!(
                        "filter graph {} has no free output {}",
                        graph,
                        label.as_deref().unwrap_or("")
                    ))
                })?;
            fg.outputs[pad].target = Some(target);
            let media_type = fg.outputs[pad].media_type;
            log::debug!(
                "output stream #{}:{} fed by filter graph {} output {} ({})",
                target.file,
                target.stream,
                graph,
                pad,
                media_type
            );
            Ok(OutputStream::new(
                target.file,
                target.stream,
                media_type,
                OutputSource::Filter(PadRef::new(*graph, pad)),
                config,
            ))
        }
    }
}

/// Picks the resynchronization method of every encoded video stream.
fn resolve_vsync(
    file: &mut OutputFile,
    config: &OutputFileConfig,
    options: &TranscodeOptions,
    inputs: &[InputFile],
    input_configs: &[InputFileConfig],
) {
    let caps = file.mux.caps.clone();
    for (ost, stream) in file.streams.iter_mut().zip(&config.streams) {
        if ost.media_type != MediaType::Video || ost.stream_copy {
            ost.vsync_method = VsyncMethod::Passthrough;
            continue;
        }
        let single_plain_input = ost.source_stream.map_or(false, |src| {
            inputs[src.file].streams.len() == 1 && input_configs[src.file].input_ts_offset == 0
        });
        ost.vsync_method = stream.vsync.unwrap_or(options.video_sync).resolve(
            &caps.format_name,
            caps.variable_fps,
            caps.no_timestamps,
            single_plain_input,
            options.copy_ts,
        );
        log::debug!(
            "output stream #{}:{} uses vsync {}",
            ost.file_index,
            ost.index,
            ost.vsync_method
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::mock::{MockEngine, MockSource};
    use crate::utils::Rational;
    use pretty_assertions::assert_eq;

    fn engine() -> MockEngine {
        let tb = Rational::new(1, 25);
        let rate = Rational::new(25, 1);
        MockEngine::new()
            .with_input("a.raw", MockSource::new().with_video_stream(tb, rate, 3))
            .with_input(
                "b.raw",
                MockSource::new()
                    .with_video_stream(tb, rate, 3)
                    .with_audio_stream(48000, 1024, 3),
            )
    }

    #[test]
    fn test_parse_stream_label() {
        assert_eq!(parse_stream_label("1:0"), Some((1, 0)));
        assert_eq!(parse_stream_label("out"), None);
        assert_eq!(parse_stream_label("a:b"), None);
    }

    #[test]
    fn test_simple_graph_per_encoded_stream() {
        let job = TranscodeJob::default()
            .input(InputFileConfig::new("a.raw"))
            .input(InputFileConfig::new("b.raw"))
            .output(
                OutputFileConfig::new("out.mkv")
                    .with_stream(OutputStreamConfig::encode(1, 1, "aac"))
                    .with_stream(OutputStreamConfig::copy(0, 0)),
            );
        let transcoder = Transcoder::new(job, Box::new(engine())).unwrap();
        assert_eq!(transcoder.graphs.len(), 1);
        assert_eq!(transcoder.graphs[0].description, "anull");
        assert!(transcoder.graphs[0].simple);

        let audio = &transcoder.inputs[1].streams[1];
        assert!(audio.decoding_needed);
        assert!(audio.decoder.is_some());
        assert_eq!(audio.filters, vec![PadRef::new(0, 0)]);

        let video = &transcoder.inputs[0].streams[0];
        assert!(!video.discard);
        assert!(!video.decoding_needed);
        assert_eq!(video.copy_targets, vec![StreamRef::new(0, 1)]);
        assert!(transcoder.inputs[1].streams[0].discard);
    }

    #[test]
    fn test_complex_graph_binding() {
        let job = TranscodeJob::default()
            .input(InputFileConfig::new("a.raw"))
            .input(InputFileConfig::new("b.raw"))
            .graph(ComplexGraphConfig::new("[1:0][0:0]mix[v]"))
            .output(
                OutputFileConfig::new("out.mkv")
                    .with_stream(OutputStreamConfig::from_graph(0, Some("v"), "ffv1")),
            );
        let transcoder = Transcoder::new(job, Box::new(engine())).unwrap();
        let graph = &transcoder.graphs[0];
        assert!(!graph.simple);
        assert_eq!(graph.inputs[0].source, StreamRef::new(1, 0));
        assert_eq!(graph.inputs[1].source, StreamRef::new(0, 0));
        assert_eq!(graph.outputs[0].target, Some(StreamRef::new(0, 0)));
        assert_eq!(transcoder.outputs[0].streams[0].vsync_method, VsyncMethod::Cfr);
    }

    #[test]
    fn test_unconnected_graph_output_rejected() {
        let job = TranscodeJob::default()
            .input(InputFileConfig::new("a.raw"))
            .graph(ComplexGraphConfig::new("[0:0]split[x][y]"))
            .output(
                OutputFileConfig::new("out.mkv")
                    .with_stream(OutputStreamConfig::from_graph(0, Some("x"), "ffv1")),
            );
        assert!(matches!(
            Transcoder::new(job, Box::new(engine())),
            Err(TranscodeError::Config(_))
        ));
    }

    #[test]
    fn test_missing_encoder() {
        let job = TranscodeJob::default()
            .input(InputFileConfig::new("a.raw"))
            .output(
                OutputFileConfig::new("out.mkv")
                    .with_stream(OutputStreamConfig::encode(0, 0, "h264")),
            );
        let result = Transcoder::new(job, Box::new(engine().without_codec("h264")));
        assert!(matches!(
            result,
            Err(TranscodeError::EncoderNotFound { file: 0, stream: 0, .. })
        ));
    }

    #[test]
    fn test_vscfr_for_single_stream_input() {
        let job = TranscodeJob::default()
            .input(InputFileConfig::new("a.raw"))
            .output(
                OutputFileConfig::new("out.mkv")
                    .with_stream(OutputStreamConfig::encode(0, 0, "ffv1")),
            );
        let transcoder = Transcoder::new(job, Box::new(engine())).unwrap();
        assert_eq!(transcoder.outputs[0].streams[0].vsync_method, VsyncMethod::Vscfr);
    }

    #[test]
    fn test_bad_mapping() {
        let job = TranscodeJob::default()
            .input(InputFileConfig::new("a.raw"))
            .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::copy(0, 3)));
        assert!(matches!(
            Transcoder::new(job, Box::new(engine())),
            Err(TranscodeError::Config(_))
        ));
    }
}
