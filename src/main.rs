use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use jarvis_voice::voice::{AudioFrame, OutputTarget, PlaybackSink, SAMPLE_RATE, SpeechStreamer};
use jarvis_voice::{
    Config, Error, EventChannel, LlmBackend, Overrides, SpeechSynthesizer, TurnCoordinator,
    TurnEngine, TurnEvent, TurnId, llm, tools,
};

/// Jarvis - a sarcastic voice assistant in your terminal
#[derive(Parser)]
#[command(name = "jarvis", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Model backend (gemini or openai)
    #[arg(long, global = true)]
    backend: Option<LlmBackend>,

    /// Model identifier
    #[arg(long, global = true)]
    model: Option<String>,

    /// Answer in text only
    #[arg(long, global = true)]
    no_voice: bool,

    /// Record speech to a WAV file instead of the speaker
    #[arg(long, global = true, value_name = "PATH")]
    output_wav: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a single question and exit
    Ask {
        /// Question text
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Print the tools declared to the model
    Tools,
    /// Test speaker output
    TestSpeaker,
    /// Test streaming TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Good evening, Sir. All systems are operational.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,jarvis_voice=info",
        1 => "info,jarvis_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        backend: cli.backend,
        model: cli.model,
        disable_voice: cli.no_voice,
        output_wav: cli.output_wav,
    };
    let config = Config::load(&overrides)?;

    match cli.command {
        Some(Command::Ask { text }) => ask(config, &text.join(" ")).await,
        Some(Command::Tools) => print_tools(&config),
        Some(Command::TestSpeaker) => test_speaker(&config).await,
        Some(Command::TestTts { text }) => test_tts(config, &text).await,
        None => chat(config).await,
    }
}

/// Build the full pipeline from configuration
fn start_pipeline(
    config: Config,
) -> anyhow::Result<(TurnCoordinator, mpsc::UnboundedReceiver<TurnEvent>)> {
    config.validate()?;

    let target = config.output_target();
    let tools = tools::builtin(config.assistant.timezone);
    let policy = config.assistant.history_policy();

    let speech: Option<Arc<dyn SpeechSynthesizer>> = if config.voice_enabled {
        Some(Arc::new(SpeechStreamer::new(config.speech)?))
    } else {
        None
    };

    tracing::info!(
        backend = %config.llm.backend,
        model = %config.llm.model,
        tools = tools.len(),
        voice = config.voice_enabled,
        "starting {}",
        config.assistant.name
    );

    let client = llm::from_config(config.llm)?;
    let engine = TurnEngine::new(client, tools)
        .with_system_prompt(config.assistant.system_prompt)
        .with_history_policy(policy);

    let sink = Arc::new(PlaybackSink::spawn(move || target.open())?);
    let (observer, events) = EventChannel::new();

    let coordinator =
        TurnCoordinator::start(engine, speech, sink, Arc::new(observer), config.pipeline);

    Ok((coordinator, events))
}

/// Interactive conversation on stdin/stdout
async fn chat(config: Config) -> anyhow::Result<()> {
    let name = config.assistant.name.clone();
    let (coordinator, mut events) = start_pipeline(config)?;

    println!("{name} is online. Type 'exit' to quit.\n");
    prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
                    break;
                }
                if line.is_empty() {
                    prompt();
                    continue;
                }
                match coordinator.submit(line) {
                    Ok(_) => {}
                    Err(Error::Busy) => {
                        println!("{name}: One thing at a time, Sir.");
                        prompt();
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Some(event) = events.recv() => {
                if let TurnEvent::FinalText { text, .. } = event {
                    println!("{name}: {text}");
                    prompt();
                }
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

fn prompt() {
    print!("You: ");
    let _ = std::io::stdout().flush();
}

/// One-shot question
async fn ask(config: Config, text: &str) -> anyhow::Result<()> {
    let name = config.assistant.name.clone();
    let (coordinator, mut events) = start_pipeline(config)?;

    let turn = coordinator.submit(text)?;
    wait_for_turn(&mut events, turn, |answer| println!("{name}: {answer}")).await;

    coordinator.shutdown().await;
    Ok(())
}

/// Print events for `turn` until it ends
async fn wait_for_turn(
    events: &mut mpsc::UnboundedReceiver<TurnEvent>,
    turn: TurnId,
    mut on_text: impl FnMut(&str),
) {
    while let Some(event) = events.recv().await {
        match event {
            TurnEvent::FinalText { turn: t, text } if t == turn => on_text(&text),
            TurnEvent::TurnEnd { turn: t } if t == turn => break,
            _ => {}
        }
    }
}

/// Print the declared tool schemas
fn print_tools(config: &Config) -> anyhow::Result<()> {
    let registry = tools::builtin(config.assistant.timezone);
    println!("{}", serde_json::to_string_pretty(&registry.declare())?);
    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    let target = match config.output_target() {
        OutputTarget::Null => OutputTarget::Speaker,
        other => other,
    };

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let total = SAMPLE_RATE * 2;
    let frame_len = SAMPLE_RATE / 10;

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..total)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            // 30% volume
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * f32::from(i16::MAX)) as i16
        })
        .collect();

    let sink = PlaybackSink::spawn(move || target.open())?;
    for (seq, chunk) in (0u64..).zip(samples.chunks(frame_len as usize)) {
        sink.enqueue(AudioFrame::from_samples(seq, chunk))?;
    }
    sink.drain().await?;
    sink.stop(Duration::from_secs(1)).await;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Stream text through the speech service and play it
async fn test_tts(config: Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let target = match config.output_target() {
        OutputTarget::Null => OutputTarget::Speaker,
        other => other,
    };
    let streamer = SpeechStreamer::new(config.speech)?;
    println!("Endpoint: {}", streamer.endpoint());

    let sink = PlaybackSink::spawn(move || target.open())?;

    let mut audio = streamer.synthesize(text).await;
    let mut frames = 0usize;
    let mut bytes = 0usize;
    while let Some(frame) = audio.next().await {
        frames += 1;
        bytes += frame.pcm.len();
        sink.enqueue(frame)?;
    }
    println!("Received {frames} frames ({bytes} bytes of PCM)");

    sink.drain().await?;
    sink.stop(Duration::from_secs(1)).await;

    println!("\n---");
    if frames == 0 {
        println!("No audio received; run with -v to see the session log.");
    } else {
        println!("If you heard the speech, TTS is working!");
    }

    Ok(())
}
