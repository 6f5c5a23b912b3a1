//! Newline-delimited JSON decoding for streamed HTTP bodies

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;

struct State {
    body: BoxStream<'static, Result<Bytes>>,
    buf: BytesMut,
    done: bool,
}

fn parse_line<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    serde_json::from_slice(line).map_err(|e| {
        Error::Decode(format!(
            "{} in line {:?}",
            e,
            String::from_utf8_lossy(line)
        ))
    })
}

/// Decode a body of JSON values separated by `\n` into a stream of `T`
///
/// Blank lines are skipped; a final line without a trailing newline is
/// still decoded. A transport error ends the stream after being yielded.
pub fn decode<T, S>(body: S) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    let state = State {
        body: body.boxed(),
        buf: BytesMut::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buf.iter().position(|b| *b == b'\n') {
                let line = state.buf.split_to(pos + 1);
                let line = line[..pos].trim_ascii();
                if line.is_empty() {
                    continue;
                }
                let item = parse_line(line);
                return Some((item, state));
            }

            if state.done {
                let rest = state.buf.split();
                let line = rest.trim_ascii();
                if line.is_empty() {
                    return None;
                }
                let item = parse_line(line);
                return Some((item, state));
            }

            match state.body.next().await {
                Some(Ok(chunk)) => state.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.buf.clear();
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventMessage;

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        let parts: Vec<Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        stream::iter(parts)
    }

    #[tokio::test]
    async fn test_decode_lines_split_across_chunks() {
        let body = chunks(&[
            "{\"ID\":\"g1\",\"Action\":\"cre",
            "ate\"}\n{\"ID\":\"g2\",\"Action\":\"start\"}\n",
        ]);
        let events: Vec<Result<EventMessage>> = decode(body).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().action, "create");
        assert_eq!(events[1].as_ref().unwrap().id, "g2");
    }

    #[tokio::test]
    async fn test_decode_skips_blank_lines_and_reads_trailing() {
        let body = chunks(&["\n\r\n{\"ID\":\"g1\"}\n\n", "{\"ID\":\"g2\"}"]);
        let events: Vec<Result<EventMessage>> = decode(body).collect().await;

        let ids: Vec<_> = events.into_iter().map(|e| e.unwrap().id).collect();
        assert_eq!(ids, vec!["g1", "g2"]);
    }

    #[tokio::test]
    async fn test_decode_reports_bad_line() {
        let body = chunks(&["not json\n{\"ID\":\"g1\"}\n"]);
        let events: Vec<Result<EventMessage>> = decode(body).collect().await;

        assert!(matches!(events[0], Err(Error::Decode(_))));
        assert_eq!(events[1].as_ref().unwrap().id, "g1");
    }

    #[tokio::test]
    async fn test_decode_stops_after_transport_error() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"{\"ID\":\"g1\"}\n{\"ID\":")),
            Err(Error::Transport("connection reset".to_string())),
            Ok(Bytes::from_static(b"\"g3\"}\n")),
        ]);
        let events: Vec<Result<EventMessage>> = decode(body).collect().await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(Error::Transport(_))));
    }
}
