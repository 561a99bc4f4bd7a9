use super::session::{Session, TurnOutcome};
use thiserror::Error;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ReplError {
    #[error("stdin/stdout I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tool backend connection lost: {0}")]
    ConnectionLost(String),
}

/// Interactive loop of the demo client: read one user line, run one turn,
/// print the reply. Exits cleanly on the user's quit token; terminates with
/// a diagnostic when the backend connection is lost mid-session.
pub async fn run(mut session: Session) -> Result<(), ReplError> {
    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    let names: Vec<&str> = session
        .declarations()
        .iter()
        .map(|declaration| declaration.name.as_str())
        .collect();
    stdout
        .write_all(
            format!(
                "Connected. {} tools available: {}\nType 'quit' or 'exit' to leave.\n",
                names.len(),
                names.join(", ")
            )
            .as_bytes(),
        )
        .await?;

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            info!("Standard input closed; ending session");
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        match session.run_turn(&line).await {
            Ok(TurnOutcome::Closed) => return Ok(()),
            Ok(TurnOutcome::Reply(reply)) => {
                // An empty reply still prints an (empty) line: the turn
                // happened, the model just said nothing.
                stdout.write_all(reply.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Err(err) if err.is_fatal() => {
                error!(%err, "Session terminated by backend connection loss");
                return Err(ReplError::ConnectionLost(err.to_string()));
            }
            Err(err) => {
                error!(%err, "Turn failed; session continues");
                stdout
                    .write_all(format!("error: {}\n", err.user_message()).as_bytes())
                    .await?;
                stdout.flush().await?;
            }
        }
    }
}
