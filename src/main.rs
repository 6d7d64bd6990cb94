use agent_room::app::AppContext;
use clap::Parser;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "agent-room")]
#[command(about = "Voice conversation with an AI agent over a WebRTC room")]
struct Args {
    /// Configuration file (defaults to config/default if present)
    #[arg(long)]
    config: Option<String>,

    /// Conversation context id, used as the room id
    context_id: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let app = match AppContext::load(args.config.as_deref()) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let controller = app.controller().clone();

    let mut updates = controller.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            tracing::info!(
                target: "agent_room::app",
                connecting = state.is_connecting,
                connected = state.is_connected,
                calibrating = state.is_calibrating,
                user_speaking = state.is_user_speaking,
                muted = state.audio_muted,
                sentences = state.ai_messages.len(),
                speaking_sentence = ?state.currently_speaking_sentence_id,
                "Conversation state"
            );
            if let Some(text) = &state.current_detected_speech {
                tracing::info!(target: "agent_room::app", "You: {text}");
            }
        }
    });

    if let Err(e) = controller.initialize(&args.context_id).await {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "agent_room::app", error = %e, "Failed to listen for Ctrl+C");
    }
    controller.leave_room().await;
    ExitCode::SUCCESS
}
