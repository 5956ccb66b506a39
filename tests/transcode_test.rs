use avtranscode::av::mock::{MockEngine, MockSource, MuxEvent};
use avtranscode::av::Packet;
use avtranscode::config::{
    ComplexGraphConfig, InputFileConfig, OutputFileConfig, OutputStreamConfig, TranscodeJob,
    TranscodeOptions,
};
use avtranscode::error::{Result, TranscodeError};
use avtranscode::transcode::Transcoder;
use avtranscode::utils::Rational;
use pretty_assertions::assert_eq;

const VIDEO_TB: Rational = Rational::new(1, 25);
const VIDEO_RATE: Rational = Rational::new(25, 1);

fn video_source(frames: usize) -> MockSource {
    MockSource::new().with_video_stream(VIDEO_TB, VIDEO_RATE, frames)
}

fn dts_of_stream(engine_packets: &[Packet], stream: usize) -> Vec<Option<i64>> {
    engine_packets
        .iter()
        .filter(|pkt| pkt.stream_index == stream)
        .map(|pkt| pkt.dts)
        .collect()
}

#[test]
fn test_looped_input_mixed_with_second_file() -> Result<()> {
    let engine = MockEngine::new()
        .with_input("loop.raw", video_source(10))
        .with_input("long.raw", video_source(30));
    let recorder = engine.recorder();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("loop.raw").with_loop(1))
        .input(InputFileConfig::new("long.raw"))
        .graph(ComplexGraphConfig::new("[0:0][1:0]mix[out]"))
        .output(
            OutputFileConfig::new("mixed.mkv")
                .with_stream(OutputStreamConfig::from_graph(0, Some("out"), "ffv1")),
        );
    let stats = Transcoder::new(job, Box::new(engine))?.run()?;

    assert_eq!(recorder.header_count("mixed.mkv"), 1);
    assert!(recorder.has_trailer("mixed.mkv"));
    let dts = dts_of_stream(&recorder.packets("mixed.mkv"), 0);
    assert_eq!(dts, (0..20).map(Some).collect::<Vec<_>>());
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.frames_duplicated, 0);
    Ok(())
}

#[test]
fn test_stream_copy_through_bitstream_filter() -> Result<()> {
    let engine = MockEngine::new().with_input("in.raw", video_source(10));
    let recorder = engine.recorder();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("in.raw"))
        .output(
            OutputFileConfig::new("out.ts").with_stream(
                OutputStreamConfig::copy(0, 0).with_bitstream_filter("h264_mp4toannexb"),
            ),
        );
    let stats = Transcoder::new(job, Box::new(engine))?.run()?;

    assert_eq!(stats.packets_written, 10);
    let dts = dts_of_stream(&recorder.packets("out.ts"), 0);
    assert_eq!(dts, (0..10).map(Some).collect::<Vec<_>>());
    assert_eq!(recorder.events("out.ts").last(), Some(&MuxEvent::Trailer));
    Ok(())
}

#[test]
fn test_header_written_before_any_packet() -> Result<()> {
    let engine = MockEngine::new().with_input(
        "av.raw",
        video_source(8).with_audio_stream(1000, 40, 8),
    );
    let recorder = engine.recorder();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("av.raw"))
        .output(
            OutputFileConfig::new("out.mkv")
                .with_stream(OutputStreamConfig::copy(0, 0))
                .with_stream(OutputStreamConfig::encode(0, 1, "aac")),
        );
    let stats = Transcoder::new(job, Box::new(engine))?.run()?;

    let events = recorder.events("out.mkv");
    assert!(matches!(events.first(), Some(MuxEvent::Header(tbs)) if tbs.len() == 2));
    assert_eq!(recorder.header_count("out.mkv"), 1);
    assert_eq!(stats.packets_written, 16);

    let packets = recorder.packets("out.mkv");
    for stream in 0..2 {
        let dts: Vec<i64> = dts_of_stream(&packets, stream).into_iter().flatten().collect();
        assert!(dts.windows(2).all(|w| w[0] <= w[1]), "stream {} dts {:?}", stream, dts);
    }
    Ok(())
}

#[test]
fn test_shortest_stops_longer_stream() -> Result<()> {
    let engine = MockEngine::new()
        .with_input("video.raw", video_source(25))
        .with_input("audio.raw", MockSource::new().with_audio_stream(1000, 20, 5));
    let recorder = engine.recorder();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("video.raw"))
        .input(InputFileConfig::new("audio.raw"))
        .output(
            OutputFileConfig::new("short.mkv")
                .with_shortest(true)
                .with_stream(OutputStreamConfig::encode(0, 0, "ffv1"))
                .with_stream(OutputStreamConfig::encode(1, 0, "aac")),
        );
    Transcoder::new(job, Box::new(engine))?.run()?;

    let packets = recorder.packets("short.mkv");
    let video = dts_of_stream(&packets, 0).len();
    let audio = dts_of_stream(&packets, 1).len();
    assert_eq!(audio, 5);
    assert!(video >= 1 && video < 25, "{} video packets written", video);
    assert!(recorder.has_trailer("short.mkv"));
    Ok(())
}

fn bounded_shortest_job(copy: bool) -> TranscodeJob {
    let (video, audio) = if copy {
        (OutputStreamConfig::copy(0, 0), OutputStreamConfig::copy(0, 1))
    } else {
        (
            OutputStreamConfig::encode(0, 0, "ffv1"),
            OutputStreamConfig::encode(0, 1, "aac"),
        )
    };
    TranscodeJob::default()
        .input(InputFileConfig::new("av.raw"))
        .output(
            OutputFileConfig::new("bounded.mkv")
                .with_shortest(true)
                .with_stream(video.with_recording_time(400_000))
                .with_stream(audio),
        )
}

fn bounded_source() -> MockSource {
    // 40 ms video frames interleaved with 40 ms audio frames
    video_source(50).with_audio_stream(1000, 40, 50)
}

#[test]
fn test_recording_time_with_shortest_stream_copy() -> Result<()> {
    let engine = MockEngine::new().with_input("av.raw", bounded_source());
    let recorder = engine.recorder();
    Transcoder::new(bounded_shortest_job(true), Box::new(engine))?.run()?;

    let packets = recorder.packets("bounded.mkv");
    let video = dts_of_stream(&packets, 0);
    let audio = dts_of_stream(&packets, 1);
    assert_eq!(video, (0..10).map(Some).collect::<Vec<_>>());
    assert!((9..=11).contains(&audio.len()), "{} audio packets written", audio.len());
    assert!(recorder.has_trailer("bounded.mkv"));
    Ok(())
}

#[test]
fn test_recording_time_with_shortest_encoded() -> Result<()> {
    let engine = MockEngine::new().with_input("av.raw", bounded_source());
    let recorder = engine.recorder();
    Transcoder::new(bounded_shortest_job(false), Box::new(engine))?.run()?;

    let packets = recorder.packets("bounded.mkv");
    let video = dts_of_stream(&packets, 0).len();
    let audio = dts_of_stream(&packets, 1).len();
    assert_eq!(video, 10);
    assert!((8..=12).contains(&audio), "{} audio packets written", audio);
    assert!(recorder.has_trailer("bounded.mkv"));
    Ok(())
}

#[test]
fn test_video_loop_covers_every_iteration() -> Result<()> {
    let engine = MockEngine::new().with_input("loop.raw", video_source(10));
    let recorder = engine.recorder();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("loop.raw").with_loop(2))
        .output(OutputFileConfig::new("loop.mkv").with_stream(OutputStreamConfig::encode(0, 0, "ffv1")));
    Transcoder::new(job, Box::new(engine))?.run()?;

    let dts = dts_of_stream(&recorder.packets("loop.mkv"), 0);
    assert_eq!(dts, (0..30).map(Some).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_audio_loop_continues_from_sample_count() -> Result<()> {
    let engine = MockEngine::new().with_input("loop.raw", MockSource::new().with_audio_stream(1000, 40, 5));
    let recorder = engine.recorder();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("loop.raw").with_loop(2))
        .output(OutputFileConfig::new("loop.mka").with_stream(OutputStreamConfig::encode(0, 0, "aac")));
    Transcoder::new(job, Box::new(engine))?.run()?;

    let dts = dts_of_stream(&recorder.packets("loop.mka"), 0);
    assert_eq!(dts, (0..15).map(|i| Some(i * 40)).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn test_frame_limit() -> Result<()> {
    let engine = MockEngine::new().with_input("in.raw", video_source(25));
    let recorder = engine.recorder();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("in.raw"))
        .output(
            OutputFileConfig::new("out.mkv")
                .with_stream(OutputStreamConfig::encode(0, 0, "ffv1").with_max_frames(5)),
        );
    let stats = Transcoder::new(job, Box::new(engine))?.run()?;

    assert_eq!(stats.packets_written, 5);
    assert_eq!(recorder.packets("out.mkv").len(), 5);
    Ok(())
}

#[test]
fn test_interrupted_run_still_finalizes() -> Result<()> {
    let engine = MockEngine::new().with_input("in.raw", video_source(25));
    let recorder = engine.recorder();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("in.raw"))
        .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::copy(0, 0)));
    let transcoder = Transcoder::new(job, Box::new(engine))?;
    transcoder.interrupt_handle().interrupt();
    let stats = transcoder.run()?;

    assert!(stats.interrupted);
    assert_eq!(stats.packets_written, 0);
    assert_eq!(recorder.header_count("out.mkv"), 1);
    assert!(recorder.has_trailer("out.mkv"));
    Ok(())
}

#[test]
fn test_empty_output_is_fatal_when_requested() -> Result<()> {
    let engine = MockEngine::new().with_input("in.raw", video_source(25));
    let options = TranscodeOptions {
        abort_on_empty_output: true,
        ..TranscodeOptions::default()
    };
    let job = TranscodeJob::new(options)
        .input(InputFileConfig::new("in.raw"))
        .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::copy(0, 0)));
    let transcoder = Transcoder::new(job, Box::new(engine))?;
    transcoder.interrupt_handle().interrupt();

    assert!(matches!(transcoder.run(), Err(TranscodeError::EmptyOutput)));
    Ok(())
}

#[test]
fn test_corrupt_packet_policy() -> Result<()> {
    let corrupt = Packet::new(vec![0u8; 32])
        .with_pts(3)
        .with_dts(3)
        .with_duration(1)
        .with_key_flag(true)
        .with_time_base(VIDEO_TB)
        .with_corrupt_flag(true);
    let source = video_source(3).with_packet(corrupt);
    let job = |options: TranscodeOptions| {
        TranscodeJob::new(options)
            .input(InputFileConfig::new("in.raw"))
            .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::copy(0, 0)))
    };

    let engine = MockEngine::new().with_input("in.raw", source.clone());
    let stats = Transcoder::new(job(TranscodeOptions::default()), Box::new(engine))?.run()?;
    assert_eq!(stats.corrupt_packets, 1);
    assert_eq!(stats.packets_written, 4);

    let options = TranscodeOptions {
        exit_on_error: true,
        ..TranscodeOptions::default()
    };
    let engine = MockEngine::new().with_input("in.raw", source);
    let result = Transcoder::new(job(options), Box::new(engine))?.run();
    assert!(matches!(
        result,
        Err(TranscodeError::CorruptPacket { file: 0, stream: 0 })
    ));
    Ok(())
}

#[test]
fn test_read_error_ends_input() -> Result<()> {
    let engine = MockEngine::new().with_input("in.raw", video_source(6).with_read_error_at(2));
    let job = TranscodeJob::default()
        .input(InputFileConfig::new("in.raw"))
        .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::copy(0, 0)));
    let stats = Transcoder::new(job, Box::new(engine))?.run()?;
    assert_eq!(stats.packets_written, 2);
    Ok(())
}

#[test]
fn test_missing_input_fails_setup() {
    let job = TranscodeJob::default()
        .input(InputFileConfig::new("nowhere.raw"))
        .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::copy(0, 0)));
    assert!(matches!(
        Transcoder::new(job, Box::new(MockEngine::new())),
        Err(TranscodeError::Io(_))
    ));
}

#[test]
fn test_audio_frames_sized_for_encoder() -> Result<()> {
    let engine = MockEngine::new()
        .with_input("a.raw", MockSource::new().with_audio_stream(48000, 1024, 4))
        .with_audio_frame_size(1024);
    let filters = engine.filter_log();

    let job = TranscodeJob::default()
        .input(InputFileConfig::new("a.raw"))
        .output(OutputFileConfig::new("a.mka").with_stream(OutputStreamConfig::encode(0, 0, "aac")));
    let stats = Transcoder::new(job, Box::new(engine))?.run()?;

    assert_eq!(stats.packets_written, 4);
    let built = filters.built();
    assert_eq!(built.len(), 1);
    assert_eq!(built[0].description, "anull");
    Ok(())
}

#[tokio::test]
async fn test_run_async() -> Result<()> {
    let engine = MockEngine::new().with_input("in.raw", video_source(12));
    let job = TranscodeJob::default()
        .input(InputFileConfig::new("in.raw"))
        .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::encode(0, 0, "ffv1")));

    let stats = Transcoder::new(job, Box::new(engine))?.run_async().await?;
    assert_eq!(stats.packets_written, 12);
    assert!(!stats.interrupted);
    Ok(())
}

#[test]
fn test_run_async_from_sync_context() -> Result<()> {
    let engine = MockEngine::new().with_input("in.raw", video_source(4));
    let job = TranscodeJob::default()
        .input(InputFileConfig::new("in.raw"))
        .output(OutputFileConfig::new("out.mkv").with_stream(OutputStreamConfig::copy(0, 0)));
    let transcoder = Transcoder::new(job, Box::new(engine))?;

    let stats = tokio_test::block_on(transcoder.run_async())?;
    assert_eq!(stats.packets_written, 4);
    Ok(())
}
