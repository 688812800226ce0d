use std::{error::Error, time::Duration};

use either::Either;
use libp2p::{
    PeerId,
    core::{
        muxing::StreamMuxerBox,
        transport::{Boxed, Transport},
        upgrade,
    },
    identity::Keypair,
    noise,
    pnet::{PnetConfig, PreSharedKey},
    tcp, tls, yamux,
};

use crate::security::SecurityUpgrade;

const UPGRADE_TIMEOUT: Duration = Duration::from_secs(20);

/// TCP secured by TLS or noise, multiplexed with yamux.
///
/// With a pre-shared key every socket runs the private network handshake
/// before anything else, so peers without the key fail the upgrade and never
/// reach a behaviour.
pub fn build_transport(
    keypair: &Keypair,
    psk: Option<PreSharedKey>,
) -> Result<Boxed<(PeerId, StreamMuxerBox)>, Box<dyn Error + Send + Sync>> {
    let security = SecurityUpgrade::new(tls::Config::new(keypair)?, noise::Config::new(keypair)?);
    let tcp = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true));

    let base = match psk {
        Some(psk) => Either::Left(
            tcp.and_then(move |socket, _| PnetConfig::new(psk).handshake(socket)),
        ),
        None => Either::Right(tcp),
    };

    Ok(base
        .upgrade(upgrade::Version::V1Lazy)
        .authenticate(security)
        .multiplex(yamux::Config::default())
        .timeout(UPGRADE_TIMEOUT)
        .boxed())
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use libp2p::{
        Multiaddr, Swarm, SwarmBuilder,
        multiaddr::Protocol,
        swarm::{SwarmEvent, dummy},
    };

    use super::*;

    type TestTransport = Boxed<(PeerId, StreamMuxerBox)>;

    fn swarm(transport: impl FnOnce(&Keypair) -> TestTransport) -> Swarm<dummy::Behaviour> {
        SwarmBuilder::with_new_identity()
            .with_tokio()
            .with_other_transport(transport)
            .unwrap()
            .with_behaviour(|_| dummy::Behaviour)
            .unwrap()
            .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(Duration::from_secs(30)))
            .build()
    }

    /// A client offering a single security protocol.
    fn single_security(keypair: &Keypair, use_tls: bool) -> TestTransport {
        let tcp = tcp::tokio::Transport::new(tcp::Config::default());
        if use_tls {
            tcp.upgrade(upgrade::Version::V1)
                .authenticate(tls::Config::new(keypair).unwrap())
                .multiplex(yamux::Config::default())
                .boxed()
        } else {
            tcp.upgrade(upgrade::Version::V1)
                .authenticate(noise::Config::new(keypair).unwrap())
                .multiplex(yamux::Config::default())
                .boxed()
        }
    }

    async fn client_connects(use_tls: bool) -> bool {
        let mut relay = swarm(|keypair| build_transport(keypair, None).unwrap());
        let mut client = swarm(|keypair| single_security(keypair, use_tls));
        relay
            .listen_on("/ip4/127.0.0.1/tcp/0".parse::<Multiaddr>().unwrap())
            .unwrap();
        let addr = loop {
            if let SwarmEvent::NewListenAddr { address, .. } = relay.select_next_some().await {
                break address;
            }
        };
        let relay_id = *relay.local_peer_id();
        client.dial(addr.with(Protocol::P2p(relay_id))).unwrap();

        let outcome = async {
            loop {
                tokio::select! {
                    _ = relay.select_next_some() => {}
                    event = client.select_next_some() => match event {
                        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                            return peer_id == relay_id;
                        }
                        SwarmEvent::OutgoingConnectionError { .. } => return false,
                        _ => {}
                    },
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(30), outcome)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_tls_only_dialer() {
        assert!(client_connects(true).await);
    }

    #[tokio::test]
    async fn accepts_noise_only_dialer() {
        assert!(client_connects(false).await);
    }
}
