//! The attached-client request dispatcher: one reader draining kernel VFS
//! requests from the mount-point transport, one worker task per request, and
//! a full drain of in-flight workers before the serve loop returns.
//!
//! The kernel transport driver itself is an external collaborator; it plugs
//! in through [`RequestStream`] and [`ReplySink`]. Per-request deadlines ride
//! the RPC context; cancelling the session token interrupts in-flight
//! workers, which reply EINTR.

pub mod request;

use self::request::{VfsOp, VfsReply, VfsRequest};
use crate::fs::errors::FsError;
use crate::rpc::VolumeClient;
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The read half of the mount-point transport. `Ok(None)` is end-of-stream:
/// the volume was unmounted and the session should drain and return.
#[async_trait]
pub trait RequestStream: Send {
    async fn next_request(&mut self) -> io::Result<Option<VfsRequest>>;
}

/// The write half. Workers complete in any order, so replies go through a
/// shared sink.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_reply(&self, reply: VfsReply) -> io::Result<()>;
}

pub struct Session<S> {
    stream: S,
    sink: Arc<dyn ReplySink>,
    client: VolumeClient,
    cancel: CancellationToken,
}

impl<S: RequestStream> Session<S> {
    pub fn new(stream: S, sink: Arc<dyn ReplySink>, client: VolumeClient) -> Self {
        Self {
            stream,
            sink,
            client,
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token (kernel interrupt, unmount teardown) makes every
    /// in-flight worker reply EINTR promptly instead of waiting out its RPC.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serves until the transport reaches end-of-stream, then waits for every
    /// in-flight worker before returning.
    pub async fn serve(mut self) -> io::Result<()> {
        let mut workers = JoinSet::new();

        loop {
            let req = match self.stream.next_request().await? {
                Some(req) => req,
                None => break,
            };
            debug!("dispatching request unique={}", req.unique);

            let client = self.client.clone();
            let sink = self.sink.clone();
            let cancel = self.cancel.clone();
            workers.spawn(async move {
                let unique = req.unique;
                let reply = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("request unique={unique} cancelled");
                        VfsReply::Error {
                            unique,
                            errno: FsError::Cancelled.to_errno(),
                        }
                    }
                    reply = handle(&client, req) => reply,
                };
                if let Err(e) = sink.send_reply(reply).await {
                    warn!("failed to send reply: {e}");
                }
            });
        }

        while workers.join_next().await.is_some() {}
        Ok(())
    }
}

/// Translates one VFS request into RPC calls and builds the single reply the
/// kernel expects for it. The request's deadline, if any, is carried on every
/// RPC the request fans out to.
async fn handle(client: &VolumeClient, req: VfsRequest) -> VfsReply {
    let unique = req.unique;
    let client = match req.deadline {
        Some(deadline) => client.with_deadline(deadline),
        None => client.clone(),
    };
    macro_rules! reply {
        ($result:expr, $ok:expr) => {
            match $result {
                Ok(value) => $ok(value),
                Err(e) => VfsReply::Error {
                    unique,
                    errno: e.to_errno(),
                },
            }
        };
    }

    match req.op {
        VfsOp::Lookup { parent, name } => reply!(
            client.lookup(parent, name).await,
            |(name, attr)| VfsReply::Entry { unique, name, attr }
        ),
        VfsOp::GetAttr { inode } => reply!(client.get_attr(inode).await, |attr| VfsReply::Attr {
            unique,
            attr
        }),
        VfsOp::SetAttr { attr, valid } => reply!(
            client.set_attr(attr, valid).await,
            |attr| VfsReply::Attr { unique, attr }
        ),
        VfsOp::Create {
            parent,
            name,
            mode,
            uid,
            gid,
        } => reply!(
            client.create(parent, name, mode, uid, gid).await,
            |(name, attr)| VfsReply::Entry { unique, name, attr }
        ),
        VfsOp::MkDir {
            parent,
            name,
            mode,
            uid,
            gid,
        } => reply!(
            client.mk_dir(parent, name, mode, uid, gid).await,
            |(name, attr)| VfsReply::Entry { unique, name, attr }
        ),
        VfsOp::Read {
            inode,
            offset,
            size,
        } => reply!(client.read(inode, offset, size).await, |data| {
            VfsReply::Data { unique, data }
        }),
        VfsOp::Write {
            inode,
            offset,
            data,
        } => {
            let count = data.len() as u64;
            reply!(client.write(inode, offset, data).await, |_| {
                VfsReply::Written { unique, count }
            })
        }
        VfsOp::Remove { parent, name } => reply!(client.remove(parent, name).await, |_| {
            VfsReply::Ok { unique }
        }),
        VfsOp::Rename {
            old_parent,
            old_name,
            new_parent,
            new_name,
        } => reply!(
            client
                .rename(old_parent, old_name, new_parent, new_name)
                .await,
            |_| VfsReply::Ok { unique }
        ),
        VfsOp::Symlink {
            parent,
            name,
            target,
            uid,
            gid,
        } => reply!(
            client.symlink(parent, name, target, uid, gid).await,
            |(name, attr)| VfsReply::Entry { unique, name, attr }
        ),
        VfsOp::ReadLink { inode } => reply!(client.read_link(inode).await, |target| {
            VfsReply::Link { unique, target }
        }),
        VfsOp::GetXattr { inode, name } => reply!(client.get_xattr(inode, name).await, |value| {
            VfsReply::Xattr { unique, value }
        }),
        VfsOp::SetXattr { inode, name, value } => {
            reply!(client.set_xattr(inode, name, value).await, |_| {
                VfsReply::Ok { unique }
            })
        }
        VfsOp::ListXattr { inode } => reply!(client.list_xattr(inode).await, |names| {
            VfsReply::XattrNames { unique, names }
        }),
        VfsOp::RemoveXattr { inode, name } => {
            reply!(client.remove_xattr(inode, name).await, |_| VfsReply::Ok {
                unique
            })
        }
        VfsOp::ReadDirAll { inode } => reply!(client.read_dir_all(inode).await, |entries| {
            VfsReply::Entries { unique, entries }
        }),
        VfsOp::StatFs => reply!(client.statfs().await, |info| VfsReply::Statfs {
            unique,
            info
        }),
    }
}
