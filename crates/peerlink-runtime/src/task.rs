//! Account actor task
//!
//! Runs an [`Account`] on a tokio task. Transport callbacks, application
//! commands and timer expiry are serialized through one loop, so the account
//! never needs a lock.

use std::sync::Arc;

use peerlink_core::{
    FindSecret, FinderDescriptor, LocationId, Message, MessageId, PeerUri, PeerlinkError, Result,
    TimeSource, TransportEvent,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::account::Account;
use crate::context::AccountNotice;

// ----------------------------------------------------------------------------
// Commands
// ----------------------------------------------------------------------------

/// Inputs accepted by the account task
#[derive(Debug)]
pub enum AccountCommand {
    Start,
    Wake,
    SetFinders(Vec<FinderDescriptor>),
    Transport(TransportEvent),
    FindPeer {
        target: PeerUri,
        find_secret: Option<FindSecret>,
        reply: oneshot::Sender<Result<MessageId>>,
    },
    Send {
        location: LocationId,
        message: Message,
        reply: oneshot::Sender<Result<bool>>,
    },
    CloseLocation {
        location: LocationId,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

// ----------------------------------------------------------------------------
// Account Handle
// ----------------------------------------------------------------------------

/// Cloneable handle for talking to a running account task
#[derive(Debug, Clone)]
pub struct AccountHandle {
    commands: mpsc::Sender<AccountCommand>,
}

impl AccountHandle {
    async fn command(&self, command: AccountCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PeerlinkError::channel_error("account task stopped"))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> AccountCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.command(command(reply)).await?;
        response
            .await
            .map_err(|_| PeerlinkError::channel_error("account task dropped the request"))?
    }

    /// Create the finder session and begin connecting
    pub async fn start(&self) -> Result<()> {
        self.command(AccountCommand::Start).await
    }

    /// Re-run every session's step
    pub async fn wake(&self) -> Result<()> {
        self.command(AccountCommand::Wake).await
    }

    pub async fn set_finders(&self, finders: Vec<FinderDescriptor>) -> Result<()> {
        self.command(AccountCommand::SetFinders(finders)).await
    }

    pub async fn transport_event(&self, event: TransportEvent) -> Result<()> {
        self.command(AccountCommand::Transport(event)).await
    }

    /// Queue a transport callback without waiting, for use from transport threads
    pub fn try_transport_event(&self, event: TransportEvent) -> Result<()> {
        self.commands
            .try_send(AccountCommand::Transport(event))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => {
                    PeerlinkError::channel_error("account event queue full")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    PeerlinkError::channel_error("account task stopped")
                }
            })
    }

    pub async fn find_peer(
        &self,
        target: PeerUri,
        find_secret: Option<FindSecret>,
    ) -> Result<MessageId> {
        self.request(|reply| AccountCommand::FindPeer {
            target,
            find_secret,
            reply,
        })
        .await
    }

    /// Send on a location session; `Ok(false)` when the session refused it
    pub async fn send(&self, location: LocationId, message: Message) -> Result<bool> {
        self.request(|reply| AccountCommand::Send {
            location,
            message,
            reply,
        })
        .await
    }

    pub async fn close_location(&self, location: LocationId) -> Result<()> {
        self.request(|reply| AccountCommand::CloseLocation { location, reply })
            .await
    }

    /// Request a graceful shutdown of every session
    pub async fn shutdown(&self) -> Result<()> {
        self.command(AccountCommand::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

// ----------------------------------------------------------------------------
// Account Task
// ----------------------------------------------------------------------------

/// The loop that owns an [`Account`]
pub struct AccountTask {
    account: Account,
    commands: mpsc::Receiver<AccountCommand>,
    notices: mpsc::Sender<AccountNotice>,
    notices_open: bool,
    time_source: Arc<dyn TimeSource>,
}

impl AccountTask {
    /// Build the task with channels sized from the account's configuration
    pub fn new(
        account: Account,
        time_source: Arc<dyn TimeSource>,
    ) -> (Self, AccountHandle, mpsc::Receiver<AccountNotice>) {
        let channel = &account.config().channel;
        let (command_sender, commands) = mpsc::channel(channel.event_buffer_size);
        let (notices, notice_receiver) = mpsc::channel(channel.notice_buffer_size);

        let task = Self {
            account,
            commands,
            notices,
            notices_open: true,
            time_source,
        };
        let handle = AccountHandle {
            commands: command_sender,
        };
        (task, handle, notice_receiver)
    }

    /// Spawn the task on the current tokio runtime
    pub fn spawn(
        account: Account,
        time_source: Arc<dyn TimeSource>,
    ) -> (AccountHandle, mpsc::Receiver<AccountNotice>, JoinHandle<Result<()>>) {
        let (task, handle, notices) = Self::new(account, time_source);
        let join = tokio::spawn(task.run());
        (handle, notices, join)
    }

    /// Run until shutdown completes or every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!(peer = %self.account.peer_uri(), "account task starting");

        loop {
            let sleep_for = self
                .account
                .next_deadline()
                .map(|deadline| deadline - self.time_source.now());

            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.process_command(command),
                        None => {
                            info!("command channel closed, shutting down");
                            self.account.shutdown(self.time_source.now());
                            self.forward_notices().await;
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep(sleep_for.unwrap_or_default()), if sleep_for.is_some() => {
                    trace!("deadline reached");
                    self.account.handle_timers(self.time_source.now());
                }
            }

            self.forward_notices().await;
            if self.account.is_shutdown() {
                break;
            }
        }

        info!("account task stopped");
        Ok(())
    }

    fn process_command(&mut self, command: AccountCommand) {
        let now = self.time_source.now();
        match command {
            AccountCommand::Start => self.account.start(now),
            AccountCommand::Wake => self.account.wake(now),
            AccountCommand::SetFinders(finders) => self.account.set_finders(now, finders),
            AccountCommand::Transport(event) => self.account.handle_transport_event(now, event),
            AccountCommand::FindPeer {
                target,
                find_secret,
                reply,
            } => {
                let result = self.account.find_peer(now, target, find_secret);
                if let Err(err) = &result {
                    debug!(error = %err, "find not issued");
                }
                if reply.send(result).is_err() {
                    debug!("find requester gone");
                }
            }
            AccountCommand::Send {
                location,
                message,
                reply,
            } => {
                let result = self.account.send(now, &location, &message);
                if reply.send(result).is_err() {
                    debug!("send requester gone");
                }
            }
            AccountCommand::CloseLocation { location, reply } => {
                let result = self.account.close_location(now, &location);
                if reply.send(result).is_err() {
                    debug!("close requester gone");
                }
            }
            AccountCommand::Shutdown => self.account.shutdown(now),
        }
    }

    /// Hand notices to the application; a dropped receiver is tolerated
    async fn forward_notices(&mut self) {
        for notice in self.account.take_notices() {
            if !self.notices_open {
                trace!(?notice, "notice discarded");
                continue;
            }
            if self.notices.send(notice).await.is_err() {
                warn!("notice receiver dropped, further notices are discarded");
                self.notices_open = false;
            }
        }
    }
}
