//! Data-channel framing. Each message is one frame:
//! `u32` little-endian payload length, then the bincode-encoded `Message`.

use crate::protocol::Message;

const HEADER_LEN: usize = 4;
/// A full QueueSync stays far below this.
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("cannot serialize message: {0}")]
    Encode(#[from] bincode::Error),
    #[error("message exceeds the 1 MiB frame limit")]
    TooLarge,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    /// Buffer ends inside the header or payload.
    #[error("incomplete frame")]
    NeedMore,
    #[error("declared frame length exceeds 1 MiB")]
    TooLarge,
    #[error("cannot deserialize message: {0}")]
    Decode(#[from] bincode::Error),
}

pub fn encode_frame(msg: &Message) -> Result<Vec<u8>, FrameEncodeError> {
    let body = bincode::serialize(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend(body);
    Ok(frame)
}

/// Declared payload length, once the header is complete.
fn payload_len(bytes: &[u8]) -> Result<usize, FrameDecodeError> {
    let header: [u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(FrameDecodeError::NeedMore)?;
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len)
}

/// Decode the frame at the front of `bytes`. Returns the message and how many
/// bytes it occupied, so a relay can forward exactly those bytes.
pub fn decode_frame(bytes: &[u8]) -> Result<(Message, usize), FrameDecodeError> {
    let end = HEADER_LEN + payload_len(bytes)?;
    let body = bytes.get(HEADER_LEN..end).ok_or(FrameDecodeError::NeedMore)?;
    Ok((bincode::deserialize(body)?, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Body, MediaType, QueueCandidate, QueueItem, Role, Vote};
    use crate::room::PeerAddress;

    fn popcorn() -> Message {
        Message::new(Body::Chat {
            sender: "Guest 7QXR".into(),
            sender_role: Role::Guest,
            text: "popcorn ready".into(),
        })
    }

    #[test]
    fn voted_item_keeps_its_votes() {
        let mut item = QueueItem::from_candidate(
            QueueCandidate {
                tmdb_id: 550,
                media_type: MediaType::Movie,
                title: "Fight Club".into(),
                poster: Some("https://image.tmdb.org/t/p/w342/fc.jpg".into()),
                year: Some(1999),
            },
            "Host",
        );
        item.votes.insert(PeerAddress::new("watchparty-B7K4XQ"), Vote::Up);
        let msg = Message::new(Body::QueueAdd { item });
        let frame = encode_frame(&msg).unwrap();
        assert_eq!(decode_frame(&frame).unwrap(), (msg, frame.len()));
    }

    #[test]
    fn truncated_frames_need_more() {
        let frame = encode_frame(&popcorn()).unwrap();
        for cut in [0, 3, HEADER_LEN, frame.len() - 1] {
            assert!(matches!(
                decode_frame(&frame[..cut]),
                Err(FrameDecodeError::NeedMore)
            ));
        }
    }

    #[test]
    fn declared_length_over_limit() {
        let mut bytes = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec();
        bytes.resize(64, 0);
        assert!(matches!(
            decode_frame(&bytes),
            Err(FrameDecodeError::TooLarge)
        ));
    }

    #[test]
    fn junk_payload() {
        let bytes = [3, 0, 0, 0, 0xff, 0xff, 0xff];
        assert!(matches!(
            decode_frame(&bytes),
            Err(FrameDecodeError::Decode(_))
        ));
    }

    #[test]
    fn back_to_back_frames() {
        let joined = Message::system("Guest 7QXR joined the party.");
        let mut buf = encode_frame(&joined).unwrap();
        let first_len = buf.len();
        buf.extend(encode_frame(&popcorn()).unwrap());

        let (first, used) = decode_frame(&buf).unwrap();
        assert_eq!(used, first_len);
        assert_eq!(first, joined);
        let (second, rest) = decode_frame(&buf[used..]).unwrap();
        assert_eq!(used + rest, buf.len());
        assert_eq!(second.body.kind(), "chat");
    }
}
