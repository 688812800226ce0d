//! Security protocol selection.
//!
//! Offers TLS and noise on every connection, TLS first. Whichever the remote
//! picks during multistream negotiation authenticates the connection.

use std::iter::{Chain, Map};

use either::Either;
use futures::{
    TryFutureExt,
    future::{self, MapOk},
};
use libp2p::{
    PeerId,
    core::{
        either::EitherFuture,
        upgrade::{InboundConnectionUpgrade, OutboundConnectionUpgrade, UpgradeInfo},
    },
};

/// Both security upgrades, negotiated as one.
#[derive(Debug, Clone)]
pub(crate) struct SecurityUpgrade<A, B> {
    preferred: A,
    fallback: B,
}

impl<A, B> SecurityUpgrade<A, B> {
    pub(crate) fn new(preferred: A, fallback: B) -> Self {
        Self {
            preferred,
            fallback,
        }
    }
}

type Authenticated<TA, TB> = (PeerId, future::Either<TA, TB>);

type Selected<FA, FB, TA, TB> = MapOk<
    EitherFuture<FA, FB>,
    fn(future::Either<(PeerId, TA), (PeerId, TB)>) -> Authenticated<TA, TB>,
>;

impl<A, B> UpgradeInfo for SecurityUpgrade<A, B>
where
    A: UpgradeInfo,
    B: UpgradeInfo,
{
    type Info = Either<A::Info, B::Info>;
    type InfoIter = Chain<
        Map<<A::InfoIter as IntoIterator>::IntoIter, fn(A::Info) -> Self::Info>,
        Map<<B::InfoIter as IntoIterator>::IntoIter, fn(B::Info) -> Self::Info>,
    >;

    fn protocol_info(&self) -> Self::InfoIter {
        let preferred = self
            .preferred
            .protocol_info()
            .into_iter()
            .map(Either::Left as fn(A::Info) -> Self::Info);
        let fallback = self
            .fallback
            .protocol_info()
            .into_iter()
            .map(Either::Right as fn(B::Info) -> Self::Info);
        preferred.chain(fallback)
    }
}

impl<C, A, B, TA, TB> InboundConnectionUpgrade<C> for SecurityUpgrade<A, B>
where
    A: InboundConnectionUpgrade<C, Output = (PeerId, TA)>,
    B: InboundConnectionUpgrade<C, Output = (PeerId, TB)>,
{
    type Output = Authenticated<TA, TB>;
    type Error = Either<A::Error, B::Error>;
    type Future = Selected<A::Future, B::Future, TA, TB>;

    fn upgrade_inbound(self, socket: C, info: Self::Info) -> Self::Future {
        match info {
            Either::Left(info) => {
                EitherFuture::First(self.preferred.upgrade_inbound(socket, info))
            }
            Either::Right(info) => {
                EitherFuture::Second(self.fallback.upgrade_inbound(socket, info))
            }
        }
        .map_ok(future::Either::factor_first)
    }
}

impl<C, A, B, TA, TB> OutboundConnectionUpgrade<C> for SecurityUpgrade<A, B>
where
    A: OutboundConnectionUpgrade<C, Output = (PeerId, TA)>,
    B: OutboundConnectionUpgrade<C, Output = (PeerId, TB)>,
{
    type Output = Authenticated<TA, TB>;
    type Error = Either<A::Error, B::Error>;
    type Future = Selected<A::Future, B::Future, TA, TB>;

    fn upgrade_outbound(self, socket: C, info: Self::Info) -> Self::Future {
        match info {
            Either::Left(info) => {
                EitherFuture::First(self.preferred.upgrade_outbound(socket, info))
            }
            Either::Right(info) => {
                EitherFuture::Second(self.fallback.upgrade_outbound(socket, info))
            }
        }
        .map_ok(future::Either::factor_first)
    }
}
