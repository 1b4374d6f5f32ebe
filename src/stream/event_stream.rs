use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use pin_project_lite::pin_project;

use super::{StreamDecoder, StreamEvent};

pin_project! {
    /// Lazy [`StreamEvent`] stream over a backend byte stream.
    ///
    /// Transport errors are yielded as-is and do not end the stream by themselves;
    /// the caller decides whether to keep polling.
    pub struct DecodedStream<S> {
        #[pin]
        inner: S,
        decoder: StreamDecoder,
        pending: VecDeque<StreamEvent>,
        scratch: Vec<StreamEvent>,
        finished: bool,
    }
}

/// Wrap `inner` so that polling it decodes events on demand.
pub fn decode_stream<S, E>(inner: S, thinking_enabled: bool) -> DecodedStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    DecodedStream {
        inner,
        decoder: StreamDecoder::new(thinking_enabled),
        pending: VecDeque::new(),
        scratch: Vec::with_capacity(8),
        finished: false,
    }
}

impl<S, E> Stream for DecodedStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<StreamEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if *this.finished {
                return Poll::Ready(None);
            }
            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.decoder.feed_into(&chunk, this.scratch),
                Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                None => {
                    *this.finished = true;
                    this.decoder.finish_into(this.scratch);
                }
            }
            this.pending.extend(this.scratch.drain(..));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_decoded_stream_yields_events_lazily() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"content\":\"<thinking>a")),
            Ok(Bytes::from_static(b"</thinking>b\"}")),
        ];
        let events: Vec<StreamEvent> = decode_stream(futures_util::stream::iter(chunks), true)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::ThinkingStart,
                StreamEvent::ThinkingDelta {
                    text: "a".to_string()
                },
                StreamEvent::ThinkingEnd,
                StreamEvent::ContentDelta {
                    text: "b".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_transport_error_is_surfaced() {
        let chunks: Vec<Result<Bytes, String>> = vec![
            Ok(Bytes::from_static(b"{\"content\":\"x\"}")),
            Err("reset".to_string()),
        ];
        let mut stream = Box::pin(decode_stream(futures_util::stream::iter(chunks), false));
        assert!(matches!(
            stream.next().await,
            Some(Ok(StreamEvent::ContentDelta { .. }))
        ));
        assert_eq!(stream.next().await, Some(Err("reset".to_string())));
    }
}
