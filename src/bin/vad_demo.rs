//! Streams a 16 kHz mono WAV file through [`silero_vad::VadHandler`] and
//! prints the resulting event sequence.
//!
//! Scoped down to exactly what the engine itself does: no UI, no recording,
//! no scoring against expected transcripts — just feed bytes and print
//! events.
//!
//! ```text
//! cargo run --bin vad_demo -- path/to/clip.wav [--model v4|v5]
//! ```

use std::path::PathBuf;

use silero_vad::{ChunkEvent, ModelVersion, SpeechEndEvent, VadConfig, VadHandler};

struct Args {
    wav_path: PathBuf,
    model: ModelVersion,
}

fn parse_args() -> Result<Args, String> {
    let mut wav_path = None;
    let mut model = ModelVersion::V4;

    let mut it = std::env::args().skip(1).peekable();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--model" => {
                let v = it.next().ok_or("missing value for --model")?;
                model = match v.as_str() {
                    "v4" => ModelVersion::V4,
                    "v5" => ModelVersion::V5,
                    other => return Err(format!("unknown model version: {other}")),
                };
            }
            "--help" | "-h" => {
                println!("Usage: vad_demo <clip.wav> [--model v4|v5]");
                std::process::exit(0);
            }
            other if wav_path.is_none() => wav_path = Some(PathBuf::from(other)),
            other => return Err(format!("unexpected argument: {other}")),
        }
    }

    Ok(Args {
        wav_path: wav_path.ok_or("missing <clip.wav> argument")?,
        model,
    })
}

/// Read a WAV file's samples as raw PCM16-LE bytes, unconverted. Errors if
/// the file isn't already 16-bit mono 16 kHz — this demo, like the engine
/// itself (`audio::mod` doc comment), does not resample or remix channels.
fn read_pcm16le(path: &PathBuf) -> Result<Vec<u8>, String> {
    let mut reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(format!(
            "expected mono audio, got {} channels",
            spec.channels
        ));
    }
    if spec.sample_rate != 16_000 {
        return Err(format!(
            "expected 16000 Hz audio, got {} Hz",
            spec.sample_rate
        ));
    }
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err("expected 16-bit PCM audio".into());
    }

    let mut bytes = Vec::new();
    for sample in reader.samples::<i16>() {
        let sample = sample.map_err(|e| e.to_string())?;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(bytes)
}

/// Feed bytes in chunks roughly matching a live microphone callback's burst
/// size, rather than in one giant batch, so the demo exercises the same
/// incremental frame-assembly path a real capture device would.
const FEED_CHUNK_BYTES: usize = 3200; // 100ms of 16kHz mono PCM16

fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(args) {
        eprintln!("vad_demo failed: {err}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), String> {
    tracing_subscriber::fmt::try_init().ok();

    let pcm = read_pcm16le(&args.wav_path)?;
    println!(
        "loaded {} bytes ({:.2}s) of PCM16 from {}",
        pcm.len(),
        pcm.len() as f64 / 2.0 / 16_000.0,
        args.wav_path.display()
    );

    let config = VadConfig {
        model: args.model,
        num_frames_to_emit: 50,
        ..Default::default()
    };

    let handler = VadHandler::new(config).map_err(|e| e.to_string())?;

    let mut speech_start_rx = handler.subscribe_speech_start();
    let mut real_speech_start_rx = handler.subscribe_real_speech_start();
    let mut speech_end_rx = handler.subscribe_speech_end();
    let mut misfire_rx = handler.subscribe_misfire();
    let mut chunk_rx = handler.subscribe_chunk();
    let mut frame_rx = handler.subscribe_frame_processed();
    let mut error_rx = handler.subscribe_error();

    handler.start_external().map_err(|e| e.to_string())?;

    for batch in pcm.chunks(FEED_CHUNK_BYTES) {
        handler.feed(batch).map_err(|e| e.to_string())?;
    }
    handler.stop().map_err(|e| e.to_string())?;

    let mut frames_seen = 0usize;
    while frame_rx.try_recv().is_ok() {
        frames_seen += 1;
    }
    println!("frames processed: {frames_seen}");

    while speech_start_rx.try_recv().is_ok() {
        println!("speechStart");
    }
    while real_speech_start_rx.try_recv().is_ok() {
        println!("realSpeechStart");
    }
    while let Ok(SpeechEndEvent { samples }) = speech_end_rx.try_recv() {
        println!("speechEnd: {} samples ({:.2}s)", samples.len(), samples.len() as f64 / 16_000.0);
    }
    while misfire_rx.try_recv().is_ok() {
        println!("misfire");
    }
    while let Ok(ChunkEvent { bytes, is_final }) = chunk_rx.try_recv() {
        println!("chunk: {} bytes (final={is_final})", bytes.len());
    }
    while let Ok(e) = error_rx.try_recv() {
        println!("error: {}", e.message);
    }

    Ok(())
}
