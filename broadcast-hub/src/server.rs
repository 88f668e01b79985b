use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader, Lines},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    error::HubError,
    hub::BroadcastHub,
    protocol::{ClientToServer, ServerToClient, decode_message, read_message, write_message},
    recipient::{ChannelRecipient, ClientHandle, Inbox, InboxEvent, Message},
};

/// Default number of chat lines queued per client before delivery waits.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Transport settings for [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Outbound queue length per connected client.
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Set the per-client queue capacity (at least 1)
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// TCP front end that turns JSON-line connections into hub calls.
pub struct Server {
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
    config: ServerConfig,
}

impl Server {
    pub fn new(listener: TcpListener, hub: Arc<BroadcastHub>) -> Self {
        Self::with_config(listener, hub, ServerConfig::default())
    }

    pub fn with_config(
        listener: TcpListener,
        hub: Arc<BroadcastHub>,
        config: ServerConfig,
    ) -> Self {
        Self {
            listener,
            hub,
            config,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            hub,
            config,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&hub);
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub, &config);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_shutdown(hub: &BroadcastHub) {
    info!(clients = hub.client_count(), "hub shutting down");
    for name in hub.connected_clients() {
        hub.unregister_client(&name);
    }
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    hub: &Arc<BroadcastHub>,
    config: &ServerConfig,
) {
    match result {
        Ok((stream, peer)) => spawn_client_handler(stream, peer, hub, config),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_client_handler(
    stream: TcpStream,
    peer: SocketAddr,
    hub: &Arc<BroadcastHub>,
    config: &ServerConfig,
) {
    let hub = Arc::clone(hub);
    let queue_capacity = config.queue_capacity;
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, hub, queue_capacity).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    hub: Arc<BroadcastHub>,
    queue_capacity: usize,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = writer;

    let name = perform_handshake(&mut reader, &mut writer).await?;
    let (handle, inbox) = register_and_welcome(&hub, &mut writer, &name, queue_capacity).await?;

    info!(?peer, name, "client joined");

    // Outbound traffic gets its own task so a client that is busy
    // broadcasting still drains the messages addressed to it.
    let (replies, reply_rx) = mpsc::channel(queue_capacity);
    let mut writer_task = tokio::spawn(run_writer(writer, inbox, reply_rx));

    let mut lines = reader.lines();
    let result = run_client_session(&hub, &mut lines, &replies, &handle, &mut writer_task).await;

    writer_task.abort();
    cleanup_client_disconnect(&hub, &handle, peer);

    result
}

async fn perform_handshake<R, W>(reader: &mut R, writer: &mut W) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = match read_message::<_, ClientToServer>(reader).await? {
        Some(message) => message,
        None => anyhow::bail!("connection closed before handshake"),
    };

    let name = extract_name(hello)?;
    validate_name(&name, writer).await?;

    Ok(name)
}

fn extract_name(message: ClientToServer) -> Result<String> {
    match message {
        ClientToServer::Hello { name } => Ok(name.trim().to_string()),
        _ => anyhow::bail!("expected hello message first"),
    }
}

async fn validate_name<W>(name: &str, writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if name.is_empty() {
        write_message(writer, &ServerToClient::error("name cannot be empty")).await?;
        anyhow::bail!("name cannot be empty");
    }
    Ok(())
}

async fn register_and_welcome<W>(
    hub: &BroadcastHub,
    writer: &mut W,
    name: &str,
    queue_capacity: usize,
) -> Result<(ClientHandle, Inbox)>
where
    W: AsyncWrite + Unpin,
{
    let (recipient, inbox) = ChannelRecipient::new(name, queue_capacity);
    let handle: ClientHandle = recipient;

    if let Err(HubError::DuplicateIdentity(_)) = hub.register_client(handle.clone()) {
        write_message(
            writer,
            &ServerToClient::error(format!("name '{name}' is already in use")),
        )
        .await?;
        anyhow::bail!("name already taken");
    }

    let roster = hub
        .connected_clients()
        .into_iter()
        .filter(|participant| participant != name)
        .collect();

    if let Err(err) = send_welcome_messages(writer, name, roster).await {
        hub.release(&handle);
        return Err(err);
    }

    Ok((handle, inbox))
}

async fn send_welcome_messages<W>(writer: &mut W, name: &str, roster: Vec<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_message(
        writer,
        &ServerToClient::Welcome {
            name: name.to_string(),
        },
    )
    .await?;

    if !roster.is_empty() {
        write_message(
            writer,
            &ServerToClient::Roster {
                participants: roster,
            },
        )
        .await?;
    }

    Ok(())
}

/// Serve one registered client until it leaves, disconnects, or its writer
/// stops.
///
/// Only waiting for the next line races against `writer_done`. A message that
/// has been read is always handled to completion, so a broadcast in flight
/// finishes its eviction pass even if the session is detached meanwhile.
async fn run_client_session<R, F>(
    hub: &BroadcastHub,
    lines: &mut Lines<R>,
    replies: &mpsc::Sender<ServerToClient>,
    handle: &ClientHandle,
    writer_done: &mut F,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    F: Future + Unpin,
{
    loop {
        let line = select! {
            biased;
            _ = &mut *writer_done => return Ok(()),
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            return Ok(());
        };
        let Some(message) = decode_message::<ClientToServer>(&line)? else {
            continue;
        };

        if !handle_client_message(message, hub, replies, handle).await {
            return Ok(());
        }
    }
}

async fn handle_client_message(
    message: ClientToServer,
    hub: &BroadcastHub,
    replies: &mpsc::Sender<ServerToClient>,
    handle: &ClientHandle,
) -> bool {
    match message {
        ClientToServer::Chat { text } => {
            if !text.trim().is_empty() {
                hub.broadcast(&text, handle.identity()).await;
            }
            true
        }
        ClientToServer::Who => {
            let roster = ServerToClient::Roster {
                participants: hub.connected_clients(),
            };
            replies.send(roster).await.is_ok()
        }
        ClientToServer::Leave => {
            // A session that was already replaced must not remove its successor.
            hub.release(handle);
            false
        }
        ClientToServer::Hello { .. } => replies
            .send(ServerToClient::error("already connected"))
            .await
            .is_ok(),
    }
}

async fn run_writer(
    mut writer: OwnedWriteHalf,
    mut inbox: Inbox,
    mut replies: mpsc::Receiver<ServerToClient>,
) {
    loop {
        let outbound = select! {
            event = inbox.recv() => match event {
                Some(InboxEvent::Message(Message { sender, text })) => {
                    ServerToClient::Chat { sender, text }
                }
                Some(InboxEvent::Detached) => {
                    let notice = ServerToClient::error("disconnected by hub");
                    if let Err(err) = write_message(&mut writer, &notice).await {
                        debug!(?err, "failed to notify client about disconnect");
                    }
                    break;
                }
                None => break,
            },
            reply = replies.recv() => match reply {
                Some(reply) => reply,
                None => break,
            },
        };

        if let Err(err) = write_message(&mut writer, &outbound).await {
            debug!(?err, "failed to deliver message to client");
            break;
        }
    }
}

fn cleanup_client_disconnect(
    hub: &BroadcastHub,
    handle: &ClientHandle,
    peer: Option<SocketAddr>,
) {
    hub.release(handle);
    info!(?peer, name = %handle.identity(), "client session ended");
}
