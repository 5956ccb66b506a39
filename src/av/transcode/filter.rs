use crate::av::{
    EndpointParams, FilterEngine, FilterGraphHandle, FilterSpec, Frame, GraphSpec, InputEndpoint,
    MediaType, OutputEndpoint,
};
use crate::codec::StreamRef;
use crate::error::{Result, TranscodeError};
use std::collections::VecDeque;

/// A graph endpoint fed by one input stream.
pub struct InputFilter {
    pub name: String,
    pub label: Option<String>,
    pub media_type: MediaType,
    pub source: StreamRef,
    /// Parameters of the frames last seen on this endpoint
    pub params: Option<EndpointParams>,
    /// Frames that arrived before the graph could be configured
    pub frame_queue: VecDeque<Frame>,
    pub eof: bool,
    pub eof_pts: Option<i64>,
}

impl InputFilter {
    pub fn new(name: String, label: Option<String>, media_type: MediaType, source: StreamRef) -> Self {
        Self {
            name,
            label,
            media_type,
            source,
            params: None,
            frame_queue: VecDeque::new(),
            eof: false,
            eof_pts: None,
        }
    }

    /// True when `frame` cannot be pushed into the current graph instance.
    pub fn needs_reinit(&self, frame: &Frame) -> bool {
        self.params
            .as_ref()
            .map_or(true, |params| params.differs_from(frame))
    }
}

/// A graph endpoint feeding one output stream.
pub struct OutputFilter {
    pub name: String,
    pub label: Option<String>,
    pub media_type: MediaType,
    /// Output stream this endpoint is bound to
    pub target: Option<StreamRef>,
    /// Parameters negotiated at the last configuration
    pub params: Option<EndpointParams>,
}

impl OutputFilter {
    pub fn new(name: String, label: Option<String>, media_type: MediaType) -> Self {
        Self {
            name,
            label,
            media_type,
            target: None,
            params: None,
        }
    }
}

/// Adaptation filters inserted around the user graph for one endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndpointChain {
    /// Display rotation to undo, degrees clockwise; 0 disables
    pub rotation: f64,
    pub deinterlace: bool,
    /// Trim window, engine time base
    pub trim_start: Option<i64>,
    pub trim_duration: Option<i64>,
    /// Fixed frame size of the audio encoder behind an output, 0 if none
    pub frame_size: usize,
}

impl EndpointChain {
    /// Filters for an input endpoint, source side first.
    pub fn input_filters(&self, media_type: MediaType) -> Vec<FilterSpec> {
        let mut chain = Vec::new();
        if media_type == MediaType::Video {
            chain.extend(rotation_filters(self.rotation));
            if self.deinterlace {
                chain.push(FilterSpec::new("yadif", None));
            }
        }
        chain.extend(self.trim_filter(media_type));
        chain
    }

    /// Filters for an output endpoint, sink side last.
    pub fn output_filters(&self, media_type: MediaType) -> Vec<FilterSpec> {
        self.trim_filter(media_type).into_iter().collect()
    }

    fn trim_filter(&self, media_type: MediaType) -> Option<FilterSpec> {
        if self.trim_start.is_none() && self.trim_duration.is_none() {
            return None;
        }
        let name = match media_type {
            MediaType::Audio => "atrim",
            _ => "trim",
        };
        let mut args = Vec::new();
        if let Some(start) = self.trim_start {
            args.push(format!("starti={}", start));
        }
        if let Some(duration) = self.trim_duration {
            args.push(format!("durationi={}", duration));
        }
        Some(FilterSpec::new(name, Some(args.join(":"))))
    }
}

/// Filters undoing a display rotation of `degrees` clockwise.
fn rotation_filters(degrees: f64) -> Vec<FilterSpec> {
    let theta = degrees.rem_euclid(360.0);
    if (theta - 90.0).abs() < 1.0 {
        vec![FilterSpec::new("transpose", Some("clock".into()))]
    } else if (theta - 180.0).abs() < 1.0 {
        vec![FilterSpec::new("hflip", None), FilterSpec::new("vflip", None)]
    } else if (theta - 270.0).abs() < 1.0 {
        vec![FilterSpec::new("transpose", Some("cclock".into()))]
    } else if theta.abs() > 1.0 && (theta - 360.0).abs() > 1.0 {
        vec![FilterSpec::new(
            "rotate",
            Some(format!("{}", theta.to_radians())),
        )]
    } else {
        Vec::new()
    }
}

/// Adaptation chains for every endpoint of one graph, in pad order.
#[derive(Debug, Clone, Default)]
pub struct GraphChains {
    pub inputs: Vec<EndpointChain>,
    pub outputs: Vec<EndpointChain>,
}

/// A filter graph between input streams and output streams.
///
/// Simple graphs carry one input and one output and belong to a single
/// encoded output stream. Complex graphs have their pads fixed when the job
/// is set up; only endpoint parameters change between configurations.
pub struct FilterGraph {
    pub index: usize,
    pub description: String,
    pub simple: bool,
    pub inputs: Vec<InputFilter>,
    pub outputs: Vec<OutputFilter>,
    pub handle: Option<Box<dyn FilterGraphHandle>>,
    configurations: u32,
}

impl FilterGraph {
    pub fn new(index: usize, description: &str, simple: bool) -> Self {
        Self {
            index,
            description: description.to_string(),
            simple,
            inputs: Vec::new(),
            outputs: Vec::new(),
            handle: None,
            configurations: 0,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.handle.is_some()
    }

    /// Every input endpoint knows the format it will receive.
    pub fn all_inputs_known(&self) -> bool {
        self.inputs.iter().all(|ifilter| ifilter.params.is_some())
    }

    pub fn configurations(&self) -> u32 {
        self.configurations
    }

    /// Discards the running instance and builds a fresh one from the
    /// current endpoint parameters. Frames queued while the graph was
    /// unconfigured are replayed, and finished inputs are closed again.
    pub fn configure(&mut self, engine: &mut dyn FilterEngine, chains: &GraphChains) -> Result<()> {
        self.handle = None;

        let pads = engine.parse(&self.description)?;
        if self.simple && (pads.inputs.len() != 1 || pads.outputs.len() != 1) {
            return Err(TranscodeError::SimpleGraphTopology {
                graph: self.description.clone(),
                inputs: pads.inputs.len(),
                outputs: pads.outputs.len(),
            });
        }

        let default_chain = EndpointChain::default();
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for (i, ifilter) in self.inputs.iter().enumerate() {
            let params = ifilter.params.clone().ok_or_else(|| {
                TranscodeError::Filter(format!(
                    "cannot determine format of input stream {}:{}",
                    ifilter.source.file, ifilter.source.stream
                ))
            })?;
            let chain = chains.inputs.get(i).unwrap_or(&default_chain);
            inputs.push(InputEndpoint {
                name: ifilter.name.clone(),
                label: ifilter.label.clone(),
                params,
                chain: chain.input_filters(ifilter.media_type),
            });
        }
        let outputs = self
            .outputs
            .iter()
            .enumerate()
            .map(|(i, ofilter)| {
                let chain = chains.outputs.get(i).unwrap_or(&default_chain);
                OutputEndpoint {
                    name: ofilter.name.clone(),
                    label: ofilter.label.clone(),
                    media_type: ofilter.media_type,
                    chain: chain.output_filters(ofilter.media_type),
                }
            })
            .collect();

        let spec = GraphSpec {
            description: self.description.clone(),
            inputs,
            outputs,
        };
        let mut handle = engine.build(&spec)?;

        for (i, ofilter) in self.outputs.iter_mut().enumerate() {
            ofilter.params = Some(handle.output_params(i));
            if let Some(chain) = chains.outputs.get(i) {
                if ofilter.media_type == MediaType::Audio && chain.frame_size > 0 {
                    handle.set_output_frame_size(i, chain.frame_size);
                }
            }
        }

        for (i, ifilter) in self.inputs.iter_mut().enumerate() {
            while let Some(frame) = ifilter.frame_queue.pop_front() {
                handle.push(i, frame)?;
            }
        }
        for (i, ifilter) in self.inputs.iter().enumerate() {
            if ifilter.eof {
                handle.close(i, ifilter.eof_pts)?;
            }
        }

        self.configurations += 1;
        log::debug!(
            "filter graph {} configured ({} time(s)): {}",
            self.index,
            self.configurations,
            self.description
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Signals end of stream on an input endpoint.
    pub fn close_input(&mut self, pad: usize, pts: Option<i64>, fallback: EndpointParams) -> Result<()> {
        let ifilter = &mut self.inputs[pad];
        ifilter.eof = true;
        ifilter.eof_pts = pts;
        match self.handle.as_mut() {
            Some(handle) => handle.close(pad, pts),
            None => {
                if ifilter.params.is_none() {
                    ifilter.params = Some(fallback);
                }
                Ok(())
            }
        }
    }
}
