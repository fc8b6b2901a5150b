use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use voice_studio::live::{EndReason, GeminiConnector, LiveController, LiveOptions};
use voice_studio::studio::{CHAT_ERROR_REPLY, CHAT_GREETING, ChatHistory, StudioClient};
use voice_studio::voice::{
    AudioCapture, AudioPlayback, CapturePipeline, DEFAULT_FRAME_SIZE, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE, PlaybackRate, PlaybackScheduler, VisualizationFeed, decode_chunk,
    encode_frame, wrap_as_container,
};
use voice_studio::voices::{self, Gender};
use voice_studio::Config;

/// Voice Studio - talk to Gemini, generate speech, chat
#[derive(Parser)]
#[command(name = "studio", version, about)]
struct Cli {
    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice conversation (Ctrl-C to end)
    Live {
        /// Prebuilt voice to answer with
        #[arg(long, env = "STUDIO_LIVE_VOICE")]
        voice: Option<String>,
        /// System instruction override
        #[arg(long)]
        instruction: Option<String>,
    },
    /// Generate speech from text
    Tts {
        /// Text to speak
        text: String,
        /// Prebuilt voice
        #[arg(long, env = "STUDIO_TTS_VOICE")]
        voice: Option<String>,
        /// Language to speak in
        #[arg(short, long)]
        language: Option<String>,
        /// Write a WAV file to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Write a timestamped WAV file to the current directory
        #[arg(long)]
        save: bool,
        /// Don't play the result
        #[arg(long)]
        no_play: bool,
        /// Playback speed (0.5 to 2.0)
        #[arg(long, default_value = "1.0")]
        speed: f32,
        /// Playback pitch shift in semitones (-12 to 12)
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        pitch: i8,
    },
    /// Chat with the fast text model; interactive without a message
    Chat {
        /// Single message to send
        message: Option<String>,
    },
    /// Suggest a short paragraph to try a voice with
    Suggest {
        /// Language of the paragraph
        #[arg(short, long)]
        language: Option<String>,
    },
    /// List prebuilt voices
    Voices {
        /// Only show voices of this gender
        #[arg(short, long)]
        gender: Option<Gender>,
    },
    /// Check that the microphone delivers live-session frames
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Check the speaker with a short chime
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_studio=info",
        1 => "info,voice_studio=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let api_key = cli.api_key;

    match cli.command {
        Command::Live { voice, instruction } => {
            let mut config = load_config(api_key)?;
            if let Some(voice) = voice {
                config.live.voice = voice;
            }
            if let Some(instruction) = instruction {
                config.live.system_instruction = instruction;
            }
            config.validate()?;
            live(&config).await
        }
        Command::Tts {
            text,
            voice,
            language,
            output,
            save,
            no_play,
            speed,
            pitch,
        } => {
            let rate = PlaybackRate::new(speed, pitch)?;
            let mut config = load_config(api_key)?;
            if let Some(voice) = voice {
                config.tts.voice = voice;
            }
            if let Some(language) = language {
                config.tts.language = language;
            }
            config.validate()?;
            let output = output.or_else(|| save.then(default_wav_path));
            tts(&config, &text, output, (!no_play).then_some(rate)).await
        }
        Command::Chat { message } => chat(&load_config(api_key)?, message).await,
        Command::Suggest { language } => {
            let config = load_config(api_key)?;
            let client = studio_client(&config)?;
            let language = language.unwrap_or_else(|| config.tts.language.clone());
            println!("{}", client.suggest_text(&language).await?);
            Ok(())
        }
        Command::Voices { gender } => {
            list_voices(gender);
            Ok(())
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Load configuration, letting `--api-key` override every other source
fn load_config(api_key: Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::load()?;
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        config.api_key = Some(SecretString::from(key));
    }
    Ok(config)
}

fn studio_client(config: &Config) -> anyhow::Result<StudioClient> {
    Ok(StudioClient::new(
        config.require_api_key()?,
        config.api_base_url.clone(),
        config.tts.model.clone(),
        config.chat.model.clone(),
    )?)
}

/// `voice-studio-<unix millis>.wav` in the current directory
fn default_wav_path() -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    PathBuf::from(format!("voice-studio-{ts}.wav"))
}

/// Run a live conversation until Ctrl-C or the remote ends it
#[allow(clippy::future_not_send)]
async fn live(config: &Config) -> anyhow::Result<()> {
    let connector = GeminiConnector::with_endpoint(
        config.require_api_key()?,
        config.live_endpoint.clone(),
    );

    let mut capture = AudioCapture::new()?;
    capture.start()?;
    let mut playback = AudioPlayback::new()?;
    playback.start()?;

    let feed = Arc::new(VisualizationFeed::new());
    let mut options = LiveOptions::new(config.live.session());
    options.frame_size = config.live.frame_size;

    println!("Connecting as {}...", config.live.voice);

    let mut controller = LiveController::new();
    let conversation = controller
        .start(&connector, options, capture, playback, Arc::clone(&feed))
        .await?;

    println!("Live. Start talking; press Ctrl-C to stop.\n");

    let meter = tokio::spawn(level_meter(Arc::clone(&feed)));
    let outcome = conversation.run(tokio::signal::ctrl_c()).await;
    meter.abort();
    controller.stop();
    eprintln!();

    match outcome? {
        EndReason::Stopped => println!("Conversation ended."),
        EndReason::RemoteClosed => println!("The session was closed by the server."),
    }

    Ok(())
}

/// Redraw input and output levels on one terminal line
async fn level_meter(feed: Arc<VisualizationFeed>) {
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    loop {
        ticker.tick().await;
        let input = feed.input().rms;
        let output = feed.output().rms;
        eprint!("\r  you [{}]  model [{}]", bar(input, 20), bar(output, 20));
        let _ = std::io::stderr().flush();
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn bar(level: f32, width: usize) -> String {
    let filled = ((level * 4.0).min(1.0) * width as f32) as usize;
    "█".repeat(filled) + &" ".repeat(width - filled)
}

/// Generate speech, optionally saving it and playing it at `play_rate`
#[allow(clippy::future_not_send)]
async fn tts(
    config: &Config,
    text: &str,
    output: Option<PathBuf>,
    play_rate: Option<PlaybackRate>,
) -> anyhow::Result<()> {
    let client = studio_client(config)?;

    println!(
        "Generating speech with {} ({})...",
        config.tts.voice, config.tts.language
    );
    let pcm = client
        .generate_speech(text, &config.tts.voice, &config.tts.language)
        .await?;

    let buffer = decode_chunk(&pcm, OUTPUT_SAMPLE_RATE)?;
    println!("Got {:.1}s of audio", buffer.duration());

    if let Some(path) = output {
        std::fs::write(&path, wrap_as_container(&pcm)?)?;
        println!("Saved {}", path.display());
    }

    if let Some(rate) = play_rate {
        let mut playback = AudioPlayback::new()?;
        playback.play(buffer, rate).await?;
    }

    Ok(())
}

/// One-shot or interactive fast chat
async fn chat(config: &Config, message: Option<String>) -> anyhow::Result<()> {
    let client = studio_client(config)?;
    let mut history = ChatHistory::greeted();

    if let Some(message) = message {
        println!("{}", history.send(&client, &message).await?);
        return Ok(());
    }

    println!("Chatting with {} (empty line or Ctrl-D to quit)\n", config.chat.model);
    println!("{CHAT_GREETING}\n");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        match history.send(&client, line).await {
            Ok(reply) => println!("{reply}\n"),
            Err(e) => {
                tracing::warn!(error = %e, "chat request failed");
                println!("{CHAT_ERROR_REPLY}\n");
            }
        }
    }

    Ok(())
}

fn list_voices(gender: Option<Gender>) {
    println!("{:<8} {:<7} {:<12} DESCRIPTION", "NAME", "GENDER", "AGE");
    for voice in voices::voices_by_gender(gender) {
        println!(
            "{:<8} {:<7} {:<12} {}",
            voice.name,
            voice.gender.to_string(),
            voice.age.to_string(),
            voice.description
        );
    }
    println!("\nLanguages: {}", voices::SUPPORTED_LANGUAGES.join(", "));
}

/// How a device was opened relative to the rate the session needs
fn describe_device(rate: u32, channels: u16, target: u32, resampling: bool) -> String {
    let layout = if channels == 1 { "mono" } else { "multichannel" };
    if resampling || channels != 1 {
        format!("{rate} Hz {layout} ({channels} ch), converted to {target} Hz mono")
    } else {
        format!("{rate} Hz mono (native)")
    }
}

/// Check that the microphone yields live-session frames
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    let mut capture = AudioCapture::new()?;
    println!(
        "Input device: {}",
        describe_device(
            capture.device_rate(),
            capture.device_channels(),
            INPUT_SAMPLE_RATE,
            capture.is_resampling(),
        )
    );
    capture.start()?;

    let mut pipeline = CapturePipeline::new(capture, DEFAULT_FRAME_SIZE)?;
    println!(
        "Framing {DEFAULT_FRAME_SIZE}-sample windows for {duration}s; speak to move the meter\n"
    );

    let mut total = 0;
    for second in 1..=duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let report = pipeline.tick(None);
        total += report.frames;
        println!(
            "[{second:2}s] frames: {:2} | level: {:.4} [{}]",
            report.frames,
            pipeline.level(),
            bar(pipeline.level(), 40)
        );
    }
    pipeline.stop();

    #[allow(clippy::cast_precision_loss)]
    let expected = (duration * u64::from(INPUT_SAMPLE_RATE)) as f64 / DEFAULT_FRAME_SIZE as f64;
    println!("\n{total} frames captured, about {expected:.0} expected at {INPUT_SAMPLE_RATE} Hz");
    if total == 0 {
        println!("No input arrived: check that this terminal may use the microphone.");
    }

    Ok(())
}

/// Check the speaker by scheduling a three-note chime back to back
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    let mut playback = AudioPlayback::new()?;
    println!(
        "Output device: {}",
        describe_device(
            playback.device_rate(),
            playback.device_channels(),
            OUTPUT_SAMPLE_RATE,
            playback.is_resampling(),
        )
    );
    playback.start()?;

    let mut scheduler = PlaybackScheduler::new(playback);
    for frequency in [523.25_f32, 659.25, 783.99] {
        let note = tone(frequency, 0.4);
        let chunk = encode_frame(&note, OUTPUT_SAMPLE_RATE);
        if let Some(scheduled) = scheduler.on_audio_chunk(&chunk.data) {
            println!("{frequency:>7.2} Hz at {:.3}s", scheduled.start);
        }
    }

    // The notes should join without gaps; allow slack for a stalled device
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !scheduler.is_idle() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.reap_finished();
    }

    let finished = scheduler.is_idle();
    scheduler.on_session_end();

    if finished {
        println!("\nChime finished. If it was silent, check the system output device.");
    } else {
        println!("\nThe output clock stalled; the device is not consuming audio.");
    }

    Ok(())
}

/// Sine tone with short fades at 24kHz
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn tone(frequency: f32, seconds: f32) -> Vec<f32> {
    let rate = OUTPUT_SAMPLE_RATE as f32;
    let len = (rate * seconds) as usize;
    let fade = (rate * 0.01) as usize;

    (0..len)
        .map(|i| {
            let t = i as f32 / rate;
            let envelope = (i.min(len - i) as f32 / fade as f32).min(1.0);
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * envelope
        })
        .collect()
}
