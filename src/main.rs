mod actions;
mod capture;
mod config;
mod error;
mod executor;
mod input;
mod intents;
mod llm;
mod memory;
mod orchestrator;
mod planner;
mod prompts;
mod screen;
mod script;
mod session;
mod speech;
mod validator;

use std::sync::Arc;

use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

use crate::capture::{CaptureProvider, FrameSource, ScreencaptureProvider};
use crate::config::AgentConfig;
use crate::input::InputBackend;
use crate::llm::ChatCompletionsClient;
use crate::orchestrator::Orchestrator;
use crate::planner::Classifier;
use crate::session::Session;
use crate::speech::SpeechSink;

#[cfg(target_os = "macos")]
fn input_backend() -> Arc<dyn InputBackend> {
    Arc::new(input::SystemEventsInput)
}

#[cfg(not(target_os = "macos"))]
fn input_backend() -> Arc<dyn InputBackend> {
    Arc::new(input::UnsupportedInput)
}

#[cfg(target_os = "macos")]
fn speech_sink() -> Arc<dyn SpeechSink> {
    Arc::new(speech::SayCommandSpeech::new())
}

#[cfg(not(target_os = "macos"))]
fn speech_sink() -> Arc<dyn SpeechSink> {
    Arc::new(speech::NullSpeech)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("screen_agent=info".parse()?))
        .init();

    let cfg = AgentConfig::from_env();
    let provider = Arc::new(ScreencaptureProvider);
    let capture: Arc<dyn CaptureProvider> = provider.clone();
    let frames: Option<Arc<dyn FrameSource>> = Some(provider);
    let planner = Arc::new(ChatCompletionsClient::planner(&cfg)?);
    let classifier = ChatCompletionsClient::classifier(&cfg)?;
    let speech = speech_sink();
    let orchestrator = Orchestrator::new(
        cfg.clone(),
        capture,
        frames,
        input_backend(),
        planner,
        speech.clone(),
    );
    let mut session = Session::new(&cfg);

    println!("Screen agent started.");
    println!("--------------------------------------------------");
    println!("Type a request, 'stop' to cut speech off, 'quit' to exit.");
    println!("--------------------------------------------------");

    let stdin = io::stdin();
    let mut reader = io::BufReader::new(stdin);
    let mut buffer = String::new();

    print!("> ");
    io::stdout().flush().await?;

    while reader.read_line(&mut buffer).await? > 0 {
        let line = buffer.trim().to_string();
        buffer.clear();

        if line.is_empty() {
            print!("> ");
            io::stdout().flush().await?;
            continue;
        }

        match line.as_str() {
            "quit" | "exit" => break,
            "stop" => {
                speech.stop();
            }
            text => {
                let classification = match classifier.classify(text).await {
                    Ok(c) => c,
                    Err(e) => {
                        println!("Classification failed: {}", e);
                        print!("> ");
                        io::stdout().flush().await?;
                        continue;
                    }
                };
                println!("[{}]", classification.label());
                let outcome = orchestrator.handle(&mut session, classification, text).await;
                let json = serde_json::to_string_pretty(&outcome).unwrap_or_default();
                println!("{}", json);
            }
        }

        print!("> ");
        io::stdout().flush().await?;
    }

    speech.stop();
    Ok(())
}
