use crate::body::CompressionBody;
use crate::filter::CompressorFilter;
use http::Response;
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

pin_project! {
    /// Future for compression service responses.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: F,
        filter: Option<CompressorFilter>,
    }
}

impl<F> ResponseFuture<F> {
    pub(crate) fn new(inner: F, filter: CompressorFilter) -> Self {
        Self {
            inner,
            filter: Some(filter),
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        match this.inner.poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => {
                if let Some(mut filter) = this.filter.take() {
                    filter.on_stream_reset();
                }
                Poll::Ready(Err(e))
            }
            Poll::Ready(Ok(response)) => match this.filter.take() {
                Some(filter) => Poll::Ready(Ok(wrap_response(response, filter))),
                // The filter is spent; a repeated response is passed through.
                None => Poll::Ready(Ok(response.map(CompressionBody::passthrough))),
            },
        }
    }
}

/// Runs the header decision and wraps the body accordingly.
fn wrap_response<B: Body>(
    response: Response<B>,
    mut filter: CompressorFilter,
) -> Response<CompressionBody<B>> {
    let (mut parts, body) = response.into_parts();

    filter.on_response_headers(&mut parts.headers, body.is_end_stream());

    let body = if filter.is_compressing() {
        CompressionBody::compressed(body, filter)
    } else {
        CompressionBody::passthrough(body)
    };

    Response::from_parts(parts, body)
}
