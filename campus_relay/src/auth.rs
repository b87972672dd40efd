// Credential check for new connections.
//
// `authenticate` turns the first frame of a connection into a validated
// `Credentials` or an auth error. It has no side effects: installing the
// session (and sending `AUTH_OK`/`AUTH_FAIL`) is up to the session thread,
// so a rejected connection can never reach the registry.

use campus_protocol::message::{AuthRequest, DEFAULT_DEPARTMENT};

use crate::error::{RelayError, Result};
use crate::identity::IdentityStore;

/// A campus that proved its identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub campus: String,
    pub department: String,
}

/// Validate a raw auth frame against `identities`.
///
/// Fails with `MissingCredential` if `Campus` or `Pass` is empty, and with
/// `InvalidCredential` if the campus is unknown or the secret is wrong. An
/// empty or absent `Dept` becomes `"General"`.
pub fn authenticate(identities: &IdentityStore, frame: &str) -> Result<Credentials> {
    let AuthRequest {
        campus,
        password,
        department,
    } = AuthRequest::parse(frame);

    if campus.is_empty() || password.is_empty() {
        return Err(RelayError::MissingCredential);
    }
    if !identities.verify(&campus, &password) {
        return Err(RelayError::InvalidCredential);
    }

    let department = if department.is_empty() {
        DEFAULT_DEPARTMENT.to_string()
    } else {
        department
    };
    Ok(Credentials { campus, department })
}
