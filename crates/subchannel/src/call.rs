// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2025 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! The call seam: how a subchannel hands an opened stream to a call.

use http::{
    HeaderMap, HeaderValue, Method, Request, Uri, Version,
    header::{CONTENT_TYPE, TE, USER_AGENT},
    uri::Scheme,
};

use crate::{
    error::SubchannelError,
    subchannel::Subchannel,
    transport::{Session, Transport},
};

/// Content type of gRPC requests.
pub const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// A call that can be started on a [`Subchannel`].
pub trait SubchannelCall<T: Transport> {
    /// The `:authority` for the request.
    fn host(&self) -> &str;

    /// The full method path, such as `/package.Service/Method`.
    fn method(&self) -> &str;

    /// Receives the opened stream and the subchannel it was opened on.
    fn attach_stream(
        &mut self,
        stream: <T::Session as Session>::Stream,
        subchannel: Subchannel<T>,
    );
}

/// Builds the HTTP/2 request that opens a call stream.
///
/// `metadata` is copied first, then the user agent, content type and `te` headers are
/// set, overriding any values it carried for them.
///
/// # Errors
///
/// Returns an error if the URI cannot be built from `host` and `method`, or if
/// `user_agent` is not a valid header value.
pub fn build_call_request(
    metadata: &HeaderMap,
    scheme: Scheme,
    host: &str,
    method: &str,
    user_agent: &str,
) -> Result<Request<()>, SubchannelError> {
    let uri = Uri::builder()
        .scheme(scheme)
        .authority(host)
        .path_and_query(method)
        .build()?;

    let mut request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .version(Version::HTTP_2)
        .body(())?;

    let headers = request.headers_mut();
    headers.extend(metadata.clone());
    headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    headers.insert(TE, HeaderValue::from_static("trailers"));

    Ok(request)
}
