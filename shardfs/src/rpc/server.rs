use crate::fs::errors::FsError;
use crate::fs::flake::Flake;
use crate::fs::inode::InodeId;
use crate::fs::key_codec::ChunkId;
use crate::fs::store::ChunkStore;
use crate::fs::types::{Attr, DirEntry, FileType, SetAttrValid, StatfsInfo};
use crate::fs::{unix_now, DirService};
use crate::rpc::VolumeApi;
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::prelude::*;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tarpc::server::{self, Channel};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// A single read is bounded; the kernel never asks for more than a few
// megabytes per request.
const MAX_READ_SIZE: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub block_size: u64,
    pub customer_id: u64,
    pub share_id: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            block_size: 64 * 1024,
            customer_id: 1,
            share_id: 1,
        }
    }
}

/// The stateless request dispatcher and block engine. Configuration is
/// read-only after startup; all shared state lives in the directory service
/// and the chunk store.
pub struct ApiServer {
    dir: Arc<DirService>,
    chunks: ChunkStore,
    flake: Arc<Flake>,
    config: ApiConfig,
}

impl ApiServer {
    pub fn new(
        dir: Arc<DirService>,
        chunks: ChunkStore,
        flake: Arc<Flake>,
        config: ApiConfig,
    ) -> Self {
        Self {
            dir,
            chunks,
            flake,
            config,
        }
    }

    pub fn dir(&self) -> &Arc<DirService> {
        &self.dir
    }

    fn chunk_id(&self, inode: InodeId, block: u64) -> ChunkId {
        ChunkId::derive(self.config.customer_id, self.config.share_id, inode, block)
    }

    /// Reads up to `size` bytes at `offset`. The range is clamped to the
    /// inode's current size, so sparse tails and truncated ranges read as
    /// absent; an absent or short chunk ends the read and the caller
    /// zero-fills the remainder.
    pub async fn read(&self, inode: InodeId, offset: u64, size: u64) -> Result<Bytes, FsError> {
        if size > MAX_READ_SIZE {
            return Err(FsError::InvalidArgument);
        }
        debug!("read inode={inode} offset={offset} size={size}");

        let attr = self.dir.getattr(inode).await?;
        if offset >= attr.size || size == 0 {
            return Ok(Bytes::new());
        }
        let want = size.min(attr.size - offset) as usize;

        let block_size = self.config.block_size;
        let mut block = offset / block_size;
        let mut start = (offset % block_size) as usize;

        let mut data = vec![0u8; want];
        let mut filled = 0usize;
        while filled < want {
            let id = self.chunk_id(inode, block);
            let chunk = match self.chunks.get(&id).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                // A read that already produced bytes returns them; the
                // caller zero-fills the tail.
                Err(_) if filled > 0 => {
                    warn!("read inode={inode} block={block}: chunk fetch failed mid-read, returning short read");
                    break;
                }
                Err(e) => return Err(e),
            };
            if chunk.len() <= start {
                break;
            }
            let count = (chunk.len() - start).min(want - filled);
            data[filled..filled + count].copy_from_slice(&chunk[start..start + count]);
            filled += count;
            if (chunk.len() as u64) < block_size {
                // The file ends within this chunk.
                break;
            }
            start = 0;
            block += 1;
        }

        data.truncate(filled);
        Ok(Bytes::from(data))
    }

    /// Writes `payload` at `offset`, one block-sized slice at a time, with
    /// read-modify-write at unaligned edges. Each block commits a directory
    /// `update` before the next begins; a mid-write failure leaves the
    /// earlier blocks in place (the write is not atomic across blocks).
    pub async fn write(
        &self,
        inode: InodeId,
        offset: u64,
        payload: &[u8],
    ) -> Result<(), FsError> {
        debug!(
            "write inode={inode} offset={offset} len={}",
            payload.len()
        );

        // Preflight the inode so a doomed write does not strew chunks.
        let attr = self.dir.getattr(inode).await?;
        match attr.file_type() {
            FileType::Regular => {}
            FileType::Directory => return Err(FsError::IsDirectory),
            FileType::Symlink => return Err(FsError::InvalidArgument),
        }

        let block_size = self.config.block_size as usize;
        let mut block = offset / self.config.block_size;
        let mut start = (offset % self.config.block_size) as usize;

        let mut cursor = 0usize;
        while cursor < payload.len() {
            let mut send = block_size.min(payload.len() - cursor);
            if send + start > block_size {
                send = block_size - start;
            }
            let slice = &payload[cursor..cursor + send];
            let id = self.chunk_id(inode, block);

            let stored_len;
            if start > 0 || send < block_size {
                // Unaligned or short: merge over whatever the block holds.
                let existing = self.chunks.get(&id).await?;
                let mut merged = vec![0u8; start + send];
                match existing {
                    Some(data) => {
                        if data.len() > merged.len() {
                            merged = data.to_vec();
                        } else {
                            merged[..data.len()].copy_from_slice(&data);
                        }
                    }
                    None if start > 0 => {
                        warn!(
                            "write inode={inode} block={block}: no existing chunk under an \
                             unaligned write; treating the prefix as zeros"
                        );
                    }
                    None => {}
                }
                merged[start..start + send].copy_from_slice(slice);
                stored_len = merged.len();
                self.chunks.put(&id, Bytes::from(merged)).await?;
            } else {
                stored_len = send;
                self.chunks.put(&id, Bytes::copy_from_slice(slice)).await?;
            }

            self.dir
                .update(
                    inode,
                    block,
                    self.config.block_size,
                    stored_len as u64,
                    unix_now(),
                )
                .await?;

            cursor += send;
            block += 1;
            start = 0;
        }
        Ok(())
    }

    pub async fn create(
        &self,
        parent: InodeId,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        let attr = self.mint_attr(mode, uid, gid);
        self.dir.create(parent, attr.inode, name, &attr, false).await
    }

    pub async fn mkdir(
        &self,
        parent: InodeId,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        let attr = self.mint_attr(mode, uid, gid);
        self.dir.create(parent, attr.inode, name, &attr, true).await
    }

    pub async fn symlink(
        &self,
        parent: InodeId,
        name: &str,
        target: &str,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        let mut attr = self.mint_attr(0, uid, gid);
        attr.size = target.len() as u64;
        self.dir
            .symlink(parent, name, target, &attr, attr.inode)
            .await
    }

    pub fn statfs(&self) -> StatfsInfo {
        StatfsInfo::synthetic()
    }

    fn mint_attr(&self, mode: u32, uid: u32, gid: u32) -> Attr {
        let ts = unix_now();
        Attr {
            inode: self.flake.next_id(),
            mode,
            uid,
            gid,
            size: 0,
            atime: ts,
            mtime: ts,
            ctime: ts,
            crtime: ts,
        }
    }
}

#[derive(Clone)]
pub struct VolumeApiServer(pub Arc<ApiServer>);

impl VolumeApi for VolumeApiServer {
    async fn get_attr(self, _: tarpc::context::Context, inode: u64) -> Result<Attr, FsError> {
        self.0.dir.getattr(inode).await
    }

    async fn set_attr(
        self,
        _: tarpc::context::Context,
        attr: Attr,
        valid: SetAttrValid,
    ) -> Result<Attr, FsError> {
        self.0.dir.setattr(attr.inode, &attr, valid).await
    }

    async fn lookup(
        self,
        _: tarpc::context::Context,
        parent: u64,
        name: String,
    ) -> Result<(String, Attr), FsError> {
        self.0.dir.lookup(parent, &name).await
    }

    async fn create(
        self,
        _: tarpc::context::Context,
        parent: u64,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        self.0.create(parent, &name, mode, uid, gid).await
    }

    async fn mk_dir(
        self,
        _: tarpc::context::Context,
        parent: u64,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        self.0.mkdir(parent, &name, mode, uid, gid).await
    }

    async fn read(
        self,
        _: tarpc::context::Context,
        inode: u64,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, FsError> {
        self.0.read(inode, offset, size).await.map(|b| b.to_vec())
    }

    async fn write(
        self,
        _: tarpc::context::Context,
        inode: u64,
        offset: u64,
        payload: Vec<u8>,
    ) -> Result<(), FsError> {
        self.0.write(inode, offset, &payload).await
    }

    async fn remove(
        self,
        _: tarpc::context::Context,
        parent: u64,
        name: String,
    ) -> Result<(), FsError> {
        self.0.dir.remove(parent, &name).await
    }

    async fn rename(
        self,
        _: tarpc::context::Context,
        old_parent: u64,
        old_name: String,
        new_parent: u64,
        new_name: String,
    ) -> Result<(), FsError> {
        self.0
            .dir
            .rename(old_parent, &old_name, new_parent, &new_name)
            .await
    }

    async fn symlink(
        self,
        _: tarpc::context::Context,
        parent: u64,
        name: String,
        target: String,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        self.0.symlink(parent, &name, &target, uid, gid).await
    }

    async fn read_link(self, _: tarpc::context::Context, inode: u64) -> Result<String, FsError> {
        self.0.dir.readlink(inode).await
    }

    async fn get_xattr(
        self,
        _: tarpc::context::Context,
        inode: u64,
        name: String,
    ) -> Result<Vec<u8>, FsError> {
        self.0.dir.getxattr(inode, &name).await.map(|b| b.to_vec())
    }

    async fn set_xattr(
        self,
        _: tarpc::context::Context,
        inode: u64,
        name: String,
        value: Vec<u8>,
    ) -> Result<(), FsError> {
        self.0.dir.setxattr(inode, &name, Bytes::from(value)).await
    }

    async fn list_xattr(
        self,
        _: tarpc::context::Context,
        inode: u64,
    ) -> Result<Vec<String>, FsError> {
        self.0.dir.listxattr(inode).await
    }

    async fn remove_xattr(
        self,
        _: tarpc::context::Context,
        inode: u64,
        name: String,
    ) -> Result<(), FsError> {
        self.0.dir.removexattr(inode, &name).await
    }

    async fn read_dir_all(
        self,
        _: tarpc::context::Context,
        inode: u64,
    ) -> Result<Vec<DirEntry>, FsError> {
        self.0.dir.readdir_all(inode).await
    }

    async fn statfs(self, _: tarpc::context::Context) -> Result<StatfsInfo, FsError> {
        Ok(self.0.statfs())
    }
}

pub async fn serve_tcp(
    addr: SocketAddr,
    api: Arc<ApiServer>,
    allowed: Vec<IpAddr>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind volume API server to {addr}"))?;
    serve_listener(listener, api, allowed, shutdown).await
}

/// One tarpc channel per accepted connection; responses run as independent
/// tasks so slow handlers never block the channel.
pub async fn serve_listener(
    listener: TcpListener,
    api: Arc<ApiServer>,
    allowed: Vec<IpAddr>,
    shutdown: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr().context("listener has no address")?;
    info!("volume API listening on {local}");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("volume API shutting down on {local}");
                break;
            }
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("failed to accept connection: {e}");
                        continue;
                    }
                };

                if !allowed.is_empty() && !allowed.contains(&peer.ip()) {
                    warn!("rejecting client {peer}: address not granted");
                    continue;
                }

                let service = VolumeApiServer(api.clone());
                let client_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let framed = Framed::new(stream, LengthDelimitedCodec::new());
                    let transport = tarpc::serde_transport::new(
                        framed,
                        tarpc::tokio_serde::formats::Bincode::default(),
                    );

                    let channel = server::BaseChannel::new(server::Config::default(), transport);

                    info!("client connected from {peer}");
                    tokio::select! {
                        _ = client_shutdown.cancelled() => {
                            debug!("client handler shutting down");
                        }
                        _ = channel
                            .execute(service.serve())
                            .for_each(|response| async move {
                                tokio::spawn(response);
                            }) => {
                            info!("client disconnected from {peer}");
                        }
                    }
                });
            }
        }
    }

    Ok(())
}
