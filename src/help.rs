//! Static security help text. Reads no state.

/// Usage and troubleshooting guide for the credential subsystem.
pub fn security_help() -> &'static str {
    "\
chainpass credential security
=============================

How secrets are resolved (first match wins):
  1. cache        recently resolved secrets, kept encrypted for 30 minutes
  2. environment  CHAINPASS_PASSWORD_<IDENTIFIER> (uppercase, non-alphanumeric
                  characters become '_')
  3. store        the encrypted credential store (passwords.enc)
  4. prompt       interactive entry (input is never echoed)
  5. default      the configured fallback secret, first-run flows only

Master key:
  The store and cache are encrypted under a master key. Set CHAINPASS_MASTER_KEY
  to supply it directly (64 hex characters are used verbatim as a 256-bit key),
  or leave it unset to derive the key from your passphrase.

Lockout:
  Five consecutive failed resolutions lock an identifier for five minutes.
  Locked identifiers are rejected immediately; wait out the lock or set the
  environment override before retrying.

Troubleshooting:
  'no credential available'   store one ('chainpass store <identifier>') or set
                              the CHAINPASS_PASSWORD_* override
  'locked after repeated
   failed attempts'           wait for the reported duration; the lock clears
                              itself
  wrong-passphrase loops      check CHAINPASS_MASTER_KEY; an empty variable is
                              ignored

Files (owner-only permissions, safe to back up as opaque blobs):
  passwords.enc       encrypted credential store
  cache.enc           encrypted resolution cache
  lockout.json        failure counters
  password_audit.log  append-only audit trail
"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_mentions_the_override_variables() {
        let help = security_help();
        assert!(help.contains("CHAINPASS_MASTER_KEY"));
        assert!(help.contains("CHAINPASS_PASSWORD_"));
        assert!(help.contains("password_audit.log"));
    }
}
