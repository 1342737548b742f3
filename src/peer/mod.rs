mod peer;

pub use peer::{
    ChannelPeer,
    Peer,
    PeerSendError,
};
