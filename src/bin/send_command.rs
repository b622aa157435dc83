use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Duration};

/// One-shot sender for the bridge's command port. Replaces fumbling with
/// netcat during field work.
#[derive(Parser, Debug)]
#[command(name = "send_command")]
#[command(about = "Send one command token to a rover_follow bridge", long_about = None)]
struct Args {
    /// Bridge command endpoint (host:port)
    #[arg(long, default_value = "127.0.0.1:5005")]
    addr: String,

    /// Wait up to two seconds for a reply (calibration triggers answer)
    #[arg(long)]
    wait_reply: bool,

    /// Token to send: MODE_CONTINUOUS, MODE_COME_TO_ME, CMD_COME_TO_ME,
    /// CMD_CANCEL_GOTO, GOTO <x> <y>, CAL_A/B/C, CAL_FINISH, CAL_REZERO_YAW
    #[arg(required = true)]
    token: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let token = args.token.join(" ");

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .send_to(token.as_bytes(), &args.addr)
        .await
        .with_context(|| format!("sending to {}", args.addr))?;
    println!("sent `{}` to {}", token, args.addr);

    if args.wait_reply {
        let mut buf = [0u8; 512];
        let (len, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .context("no reply within two seconds")??;
        println!("{}", String::from_utf8_lossy(&buf[..len]).trim());
    }

    Ok(())
}
