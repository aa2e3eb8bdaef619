use std::io;
use std::net::IpAddr;

use tokio::net::TcpStream;

pub(crate) async fn connect(ip: IpAddr, port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((ip, port)).await?;
    // Frames are already batched by the carrier; Nagle only adds latency.
    stream.set_nodelay(true)?;
    Ok(stream)
}
