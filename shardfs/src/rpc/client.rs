use crate::fs::errors::FsError;
use crate::fs::types::{Attr, DirEntry, SetAttrValid, StatfsInfo};
use crate::rpc::VolumeApiClient;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::time::Instant;
use tarpc::client::RpcError;
use tarpc::context;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::error;

/// Typed client over the volume API. Transport failures are folded into the
/// error taxonomy so callers see one error type end to end. A caller-supplied
/// deadline rides the tarpc context of every call made through a
/// [`VolumeClient::with_deadline`] handle.
#[derive(Clone)]
pub struct VolumeClient {
    inner: VolumeApiClient,
    deadline: Option<Instant>,
}

fn flatten<T>(result: Result<Result<T, FsError>, RpcError>) -> Result<T, FsError> {
    match result {
        Ok(inner) => inner,
        Err(RpcError::DeadlineExceeded) => Err(FsError::DeadlineExceeded),
        Err(e) => {
            error!("rpc transport failure: {e}");
            Err(FsError::Io)
        }
    }
}

impl VolumeClient {
    pub async fn connect_tcp(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to volume API at {addr}"))?;
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let transport =
            tarpc::serde_transport::new(framed, tarpc::tokio_serde::formats::Bincode::default());
        let inner = VolumeApiClient::new(tarpc::client::Config::default(), transport).spawn();
        Ok(Self {
            inner,
            deadline: None,
        })
    }

    /// A handle whose calls all carry `deadline`; the underlying connection
    /// is shared.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            inner: self.inner.clone(),
            deadline: Some(deadline),
        }
    }

    fn ctx(&self) -> context::Context {
        let mut ctx = context::current();
        if let Some(deadline) = self.deadline {
            ctx.deadline = deadline;
        }
        ctx
    }

    pub async fn get_attr(&self, inode: u64) -> Result<Attr, FsError> {
        flatten(self.inner.get_attr(self.ctx(), inode).await)
    }

    pub async fn set_attr(&self, attr: Attr, valid: SetAttrValid) -> Result<Attr, FsError> {
        flatten(self.inner.set_attr(self.ctx(), attr, valid).await)
    }

    pub async fn lookup(&self, parent: u64, name: String) -> Result<(String, Attr), FsError> {
        flatten(self.inner.lookup(self.ctx(), parent, name).await)
    }

    pub async fn create(
        &self,
        parent: u64,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        flatten(
            self.inner
                .create(self.ctx(), parent, name, mode, uid, gid)
                .await,
        )
    }

    pub async fn mk_dir(
        &self,
        parent: u64,
        name: String,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        flatten(
            self.inner
                .mk_dir(self.ctx(), parent, name, mode, uid, gid)
                .await,
        )
    }

    pub async fn read(&self, inode: u64, offset: u64, size: u64) -> Result<Vec<u8>, FsError> {
        flatten(self.inner.read(self.ctx(), inode, offset, size).await)
    }

    pub async fn write(&self, inode: u64, offset: u64, payload: Vec<u8>) -> Result<(), FsError> {
        flatten(self.inner.write(self.ctx(), inode, offset, payload).await)
    }

    pub async fn remove(&self, parent: u64, name: String) -> Result<(), FsError> {
        flatten(self.inner.remove(self.ctx(), parent, name).await)
    }

    pub async fn rename(
        &self,
        old_parent: u64,
        old_name: String,
        new_parent: u64,
        new_name: String,
    ) -> Result<(), FsError> {
        flatten(
            self.inner
                .rename(self.ctx(), old_parent, old_name, new_parent, new_name)
                .await,
        )
    }

    pub async fn symlink(
        &self,
        parent: u64,
        name: String,
        target: String,
        uid: u32,
        gid: u32,
    ) -> Result<(String, Attr), FsError> {
        flatten(
            self.inner
                .symlink(self.ctx(), parent, name, target, uid, gid)
                .await,
        )
    }

    pub async fn read_link(&self, inode: u64) -> Result<String, FsError> {
        flatten(self.inner.read_link(self.ctx(), inode).await)
    }

    pub async fn get_xattr(&self, inode: u64, name: String) -> Result<Vec<u8>, FsError> {
        flatten(self.inner.get_xattr(self.ctx(), inode, name).await)
    }

    pub async fn set_xattr(
        &self,
        inode: u64,
        name: String,
        value: Vec<u8>,
    ) -> Result<(), FsError> {
        flatten(self.inner.set_xattr(self.ctx(), inode, name, value).await)
    }

    pub async fn list_xattr(&self, inode: u64) -> Result<Vec<String>, FsError> {
        flatten(self.inner.list_xattr(self.ctx(), inode).await)
    }

    pub async fn remove_xattr(&self, inode: u64, name: String) -> Result<(), FsError> {
        flatten(self.inner.remove_xattr(self.ctx(), inode, name).await)
    }

    pub async fn read_dir_all(&self, inode: u64) -> Result<Vec<DirEntry>, FsError> {
        flatten(self.inner.read_dir_all(self.ctx(), inode).await)
    }

    pub async fn statfs(&self) -> Result<StatfsInfo, FsError> {
        flatten(self.inner.statfs(self.ctx()).await)
    }
}
