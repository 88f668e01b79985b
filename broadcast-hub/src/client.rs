use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    protocol::{ClientToServer, ServerToClient, decode_message, write_message},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (reader, mut writer) = establish_connection(&args).await?;
    send_handshake(&mut writer, &args.name).await?;

    // `next_line` is cancel safe, so neither source loses a partial line
    // when the other one wins the select.
    let mut server_lines = reader.lines();
    let mut stdin_lines = BufReader::new(tokio::io::stdin()).lines();

    run_client_loop(&mut server_lines, &mut writer, &mut stdin_lines).await?;
    shutdown_connection(&mut writer).await;

    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

async fn send_handshake(writer: &mut OwnedWriteHalf, name: &str) -> Result<()> {
    write_message(
        writer,
        &ClientToServer::Hello {
            name: name.to_string(),
        },
    )
    .await?;
    Ok(())
}

async fn run_client_loop(
    server_lines: &mut Lines<BufReader<OwnedReadHalf>>,
    writer: &mut OwnedWriteHalf,
    stdin_lines: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    loop {
        select! {
            server_line = server_lines.next_line() => {
                if !handle_server_line(server_line).await? {
                    break;
                }
            }
            input = stdin_lines.next_line() => {
                if !handle_stdin_input(input, writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_server_line(line: io::Result<Option<String>>) -> Result<bool> {
    match line? {
        Some(line) => {
            if let Some(message) = decode_message::<ServerToClient>(&line)? {
                render_server_message(message).await?;
            }
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

/// What a line typed at the prompt asks the client to do.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Skip,
    Quit,
    Who,
    Chat(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let text = line.trim_end();
    if text.trim().is_empty() {
        Input::Skip
    } else if text.eq_ignore_ascii_case("/quit") {
        Input::Quit
    } else if text.eq_ignore_ascii_case("/who") {
        Input::Who
    } else {
        Input::Chat(text)
    }
}

async fn handle_stdin_input(
    input: io::Result<Option<String>>,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let Some(line) = input? else {
        return Ok(false);
    };

    match parse_input(&line) {
        Input::Skip => Ok(true),
        Input::Quit => {
            write_message(writer, &ClientToServer::Leave).await?;
            write_stdout("*** leaving chat").await?;
            Ok(false)
        }
        Input::Who => {
            write_message(writer, &ClientToServer::Who).await?;
            Ok(true)
        }
        Input::Chat(text) => {
            write_message(
                writer,
                &ClientToServer::Chat {
                    text: text.to_string(),
                },
            )
            .await?;
            Ok(true)
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

fn render(message: &ServerToClient) -> Option<String> {
    match message {
        ServerToClient::Welcome { name } => Some(format!("*** connected as {name}")),
        ServerToClient::Roster { participants } if participants.is_empty() => None,
        ServerToClient::Roster { participants } => Some(format!(
            "*** currently online: {}",
            participants.join(", ")
        )),
        ServerToClient::Chat { sender, text } => Some(format!("<{sender}> {text}")),
        ServerToClient::Error { message } => Some(format!("!!! {message}")),
    }
}

async fn render_server_message(message: ServerToClient) -> io::Result<()> {
    let Some(line) = render(&message) else {
        return Ok(());
    };

    match message {
        ServerToClient::Error { .. } => write_stderr(&line).await,
        _ => write_stdout(&line).await,
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}
