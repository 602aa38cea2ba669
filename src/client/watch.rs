//! Watch folder backend: the client picks metafiles up from a directory.
use std::io;

use async_trait::async_trait;

use super::{Adapter, InjectRequest, Result};
use crate::conf::{ClientConf, ClientKind};
use crate::error::client::ClientError;

pub struct Watch {
    conf: ClientConf,
}

impl Watch {
    pub fn new(conf: ClientConf) -> Self {
        Self { conf }
    }
}

#[async_trait]
impl Adapter for Watch {
    fn kind(&self) -> ClientKind {
        ClientKind::Watch
    }

    async fn inject(&self, req: &InjectRequest<'_>) -> Result<()> {
        let folder = self
            .conf
            .watch_folder
            .as_deref()
            .ok_or_else(|| ClientError::Protocol("no watch folder configured".into()))?;
        let name = req.metafile_path.file_name().ok_or_else(|| {
            ClientError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} has no file name", req.metafile_path),
            ))
        })?;
        let dst = folder.join(name);
        tokio::fs::copy(req.metafile_path, &dst).await?;
        log::info!("Copied metafile to watch folder {:?}", dst);
        Ok(())
    }
}
