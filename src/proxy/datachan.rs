//! Data-channel byte movement: the splice step and the cache replay.

use log::debug;
use std::io;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use super::session::BUFFER_SIZE;

/// Forwards one readiness-worth of bytes from `src` into `dst`.
///
/// Returns the bytes copied, `Some(0)` when the readiness was spurious,
/// or `None` when `src` reached end of stream. Each read is matched by a
/// single write of the same byte count.
pub(crate) async fn splice_chunk(
    src: &TcpStream,
    dst: &mut TcpStream,
    buf: &mut [u8],
) -> io::Result<Option<usize>> {
    let n = match src.try_read(buf) {
        Ok(0) => return Ok(None),
        Ok(n) => n,
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Some(0)),
        Err(e) => return Err(e),
    };
    dst.write_all(&buf[..n]).await?;
    Ok(Some(n))
}

/// Streams a cache artifact into `sink` in buffer-sized chunks and returns
/// the byte count delivered.
pub(crate) async fn replay<R>(reader: &mut R, sink: &mut TcpStream) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        debug!("Read {} bytes from cache file", n);
        sink.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}
