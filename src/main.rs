use anyhow::{Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use clap::Parser;
use rxbridge_core::{codec, AudioFormat, AudioSample, EnvelopeKind};
use rxbridge_extension::ExtensionRegistry;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rxbridge", about = "Relay receiver audio to a transcription backend")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Raw signed 16-bit little-endian mono PCM; `-` reads stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    #[arg(long, default_value_t = 16000)]
    sample_rate: u32,

    /// Capture tick length fed to the extension
    #[arg(long, default_value_t = 20)]
    chunk_ms: u64,

    /// Append every encoded result envelope to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = rxbridge_core::AppConfig::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;

    let env_filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::Registry::default().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false),
    );
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    tracing::info!("rxbridge starting");

    let format = AudioFormat {
        channels: 1,
        bits_per_sample: 16,
        sample_rate: cli.sample_rate,
    };
    let registry = ExtensionRegistry::new(config.backend.clone());
    let mut extension = registry
        .create(&config.extension.name, format, &config.extension.params)
        .with_context(|| format!("failed to create extension '{}'", config.extension.name))?;

    let (sample_tx, sample_rx) = mpsc::channel::<AudioSample>(64);
    let (result_tx, result_rx) = mpsc::channel::<Vec<u8>>(config.extension.result_buffer.max(1));

    extension
        .start(sample_rx, result_tx)
        .await
        .with_context(|| format!("failed to start extension '{}'", extension.name()))?;
    tracing::info!(
        extension = %extension.name(),
        backend = %config.backend.url,
        "extension attached"
    );

    let sink = tokio::spawn(drain_results(result_rx, cli.output.clone()));

    let input: Box<dyn AsyncRead + Unpin + Send> = if cli.input == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(
            tokio::fs::File::open(&cli.input)
                .await
                .with_context(|| format!("failed to open input {}", cli.input))?,
        )
    };

    let chunk = Duration::from_millis(cli.chunk_ms.max(1));
    tokio::select! {
        fed = feed_pcm(input, sample_tx, cli.sample_rate, chunk) => {
            let fed = fed.context("reading PCM input")?;
            tracing::info!(samples = fed, "input exhausted");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    tracing::info!("shutting down");
    extension.stop().await.context("failed to stop extension")?;
    drop(extension);

    match sink.await {
        Ok(Ok(count)) => tracing::info!(envelopes = count, "result sink drained"),
        Ok(Err(e)) => tracing::error!("result sink failed: {e:#}"),
        Err(e) => tracing::error!("result sink task panicked: {e}"),
    }
    Ok(())
}

/// Read PCM in capture-sized ticks and hand them to the extension at
/// real-time pace. Returns the number of samples fed.
async fn feed_pcm(
    mut input: Box<dyn AsyncRead + Unpin + Send>,
    samples: mpsc::Sender<AudioSample>,
    sample_rate: u32,
    chunk: Duration,
) -> Result<u64> {
    let per_chunk = usize::try_from(u128::from(sample_rate) * chunk.as_millis() / 1000)
        .unwrap_or(usize::MAX)
        .max(1);
    let mut bytes = vec![0u8; per_chunk * 2];
    let mut ticker = tokio::time::interval(chunk);
    let mut rtp_timestamp: u32 = 0;
    let mut fed: u64 = 0;

    loop {
        let n = read_full(&mut input, &mut bytes).await?;
        if n < 2 {
            return Ok(fed);
        }
        let mut pcm = vec![0i16; n / 2];
        LittleEndian::read_i16_into(&bytes[..n - n % 2], &mut pcm);

        ticker.tick().await;
        let len = pcm.len();
        if samples.send(AudioSample::new(pcm, rtp_timestamp)).await.is_err() {
            tracing::warn!("extension stopped consuming audio");
            return Ok(fed);
        }
        rtp_timestamp = rtp_timestamp.wrapping_add(len as u32);
        fed += len as u64;
    }
}

async fn read_full(input: &mut (dyn AsyncRead + Unpin + Send), buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Log every envelope and optionally append the raw bytes to `output`.
async fn drain_results(mut results: mpsc::Receiver<Vec<u8>>, output: Option<PathBuf>) -> Result<u64> {
    let mut file = match output {
        Some(path) => Some(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .with_context(|| format!("failed to open output {}", path.display()))?,
        ),
        None => None,
    };

    let mut count = 0;
    while let Some(bytes) = results.recv().await {
        count += 1;
        if let Some(file) = file.as_mut() {
            file.write_all(&bytes).await.context("writing envelope")?;
        }

        match codec::decode(&bytes) {
            Ok(envelope) if envelope.kind == EnvelopeKind::Segments => {
                let at = chrono::DateTime::from_timestamp_nanos(envelope.timestamp as i64);
                tracing::info!(
                    at = %at.format("%H:%M:%S%.3f"),
                    "segments: {}",
                    String::from_utf8_lossy(&envelope.payload)
                );
            }
            Ok(envelope) => {
                tracing::info!(kind = ?envelope.kind, value = ?envelope.metric_value(), "metric");
            }
            Err(e) => tracing::warn!("undecodable envelope: {e}"),
        }
    }
    Ok(count)
}
