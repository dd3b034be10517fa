//! Presign protocol implementation

use super::{
    BlindingExponent, Commitment, CommitmentEntry, PlaceholderShare, PresignatureBundle,
    SigningCommitment, XValue,
};
use crate::arith::{self, RandomSource};
use crate::mpc::{self, Relay};
use crate::sharing::lagrange_at_zero;
use crate::types::{message_representative, product_mod};
use crate::{Error, KeyShare, PartyId, Result, SessionConfig, SessionId};
use num_bigint::BigInt;
use num_traits::Signed;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument};

/// Agreed dummy message m₀ whose representative anchors the correction search
pub const DUMMY_MESSAGE: &[u8] = b"trsa presign dummy message";

const ROUND_BLINDING: u32 = 1;
const ROUND_COMMITMENT: u32 = 2;
const ROUND_PLACEHOLDER: u32 = 3;
const ROUND_X: u32 = 4;

/// h_t_i = SHA-256(session || party || c'_t_i).
pub fn commit_placeholder(
    session_id: &SessionId,
    party_id: PartyId,
    placeholder: &BigInt,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(session_id);
    hasher.update((party_id as u64).to_le_bytes());
    hasher.update(arith::to_bytes(placeholder));
    hasher.finalize().into()
}

/// Exchange blinding exponents around the ring of members.
///
/// Returns the predecessor's exponent; a lone member is its own predecessor.
async fn ring_exchange<R: Relay>(
    config: &SessionConfig,
    lambda_t_i: &BigInt,
    field: &BigInt,
    relay: &R,
) -> Result<BigInt> {
    let k = config.n_parties();
    if k == 1 {
        return Ok(lambda_t_i.clone());
    }
    let position = config.position();
    let successor = config.parties[(position + 1) % k];
    let predecessor = config.parties[(position + k - 1) % k];

    let message = BlindingExponent {
        from: config.party_id,
        to: successor,
        value: lambda_t_i.clone(),
    };
    relay
        .send_direct(&config.session_id, ROUND_BLINDING, successor, &message)
        .await?;

    let received: Vec<BlindingExponent> =
        mpc::collect_direct_within(relay, config, ROUND_BLINDING, 1, "blinding exponent").await?;
    let received = received
        .into_iter()
        .next()
        .ok_or_else(|| Error::Internal("empty blinding collection".into()))?;
    if received.from != predecessor || received.to != config.party_id {
        return Err(Error::invalid_share(received.from, "blinding exponent out of ring order"));
    }
    if received.value.is_negative() || &received.value >= field {
        return Err(Error::invalid_share(received.from, "blinding exponent outside F_P"));
    }
    Ok(received.value)
}

/// Smallest c in `[0, k)` with `(prod c')^e = m₀ * (m₀^{eP})^c mod N`.
fn find_correction(product: &BigInt, m0: &BigInt, key: &KeyShare, k: usize) -> Option<usize> {
    let n = &key.public_key.modulus;
    let e = &key.public_key.exponent;
    let lhs = arith::powmod(product, e, n);
    let step = arith::powmod(m0, &(e * &key.backup_prime), n);
    let mut rhs = m0.clone();
    for c in 0..k {
        if lhs == rhs {
            return Some(c);
        }
        rhs = arith::modulo(&(rhs * &step), n);
    }
    None
}

/// Run the presign protocol for the quorum `config.parties`.
///
/// `config.epoch` tags the resulting bundle; a bundle is only usable for the
/// exact member list and epoch it was produced under.
#[instrument(skip_all, fields(party_id = config.party_id, epoch = config.epoch))]
pub async fn run_presign<R, S>(
    key: &KeyShare,
    config: &SessionConfig,
    rng: &mut S,
    relay: &R,
) -> Result<PresignatureBundle>
where
    R: Relay,
    S: RandomSource + ?Sized,
{
    info!(participants = ?config.parties, "Starting presign");

    let k = config.n_parties();
    if k < key.threshold {
        return Err(Error::InsufficientQuorum {
            required: key.threshold,
            actual: k,
        });
    }
    if let Some(stranger) = config.parties.iter().find(|id| !key.registry.contains(id)) {
        return Err(Error::InvalidPartyId(*stranger));
    }
    if config.party_id != key.party_id {
        return Err(Error::InvalidPartyId(config.party_id));
    }

    let field = &key.backup_prime;
    let modulus = &key.public_key.modulus;

    // Step 1: exponent share blinded around the ring
    let points: Vec<u64> = config.parties.iter().map(|&id| id as u64 + 1).collect();
    let lagrange = lagrange_at_zero(key.party_id as u64 + 1, &points, field)?;
    let lambda_t_i = rng.random_int(field);
    let lambda_pred = ring_exchange(config, &lambda_t_i, field, relay).await?;
    let s_t_i = arith::modulo(
        &(lagrange * &key.polynomial_share + &lambda_t_i - lambda_pred),
        field,
    );

    let m0 = message_representative(DUMMY_MESSAGE, modulus);
    let sigma_t_i = arith::powmod(&m0, &s_t_i, modulus);
    debug!("Placeholder share computed");

    // Step 2: commit
    let h_t_i = commit_placeholder(&config.session_id, config.party_id, &sigma_t_i);
    let commitments = mpc::exchange_broadcast(
        relay,
        config,
        ROUND_COMMITMENT,
        &Commitment {
            from: config.party_id,
            digest: h_t_i,
        },
        "placeholder commitments",
    )
    .await?;
    let received_h_t_i: BTreeMap<PartyId, [u8; 32]> = commitments
        .into_iter()
        .filter(|(from, _)| *from != config.party_id)
        .map(|(from, c)| (from, c.digest))
        .collect();

    // Step 3: open and check against the commitments
    let openings = mpc::exchange_broadcast(
        relay,
        config,
        ROUND_PLACEHOLDER,
        &PlaceholderShare {
            from: config.party_id,
            value: sigma_t_i.clone(),
        },
        "placeholder shares",
    )
    .await?;

    let mut entries = Vec::with_capacity(k);
    for (from, opening) in &openings {
        let digest = if *from == config.party_id {
            h_t_i
        } else {
            let digest = received_h_t_i
                .get(from)
                .copied()
                .ok_or_else(|| Error::invalid_share(*from, "no commitment received"))?;
            let expected = commit_placeholder(&config.session_id, *from, &opening.value);
            if !bool::from(expected[..].ct_eq(&digest[..])) {
                return Err(Error::invalid_share(*from, "placeholder does not match commitment"));
            }
            if opening.value.is_negative() || &opening.value >= modulus {
                return Err(Error::invalid_share(*from, "placeholder outside Z_N"));
            }
            digest
        };
        entries.push(CommitmentEntry {
            party_id: *from,
            digest,
            placeholder: opening.value.clone(),
        });
    }

    let product = product_mod(openings.values().map(|o| &o.value), modulus);
    let correction = find_correction(&product, &m0, key, k).ok_or_else(|| {
        Error::VerificationFailed("placeholder shares do not combine to a signature".into())
    })?;
    let x_quorum = BigInt::from(correction) * field;
    debug!(correction, "Quorum correction found");

    // Step 4: agree on x_I
    let announced = mpc::exchange_broadcast(
        relay,
        config,
        ROUND_X,
        &XValue {
            from: config.party_id,
            x: x_quorum.clone(),
        },
        "quorum corrections",
    )
    .await?;
    let mut received_x = BTreeMap::new();
    for (from, value) in announced {
        if value.x != x_quorum {
            return Err(Error::invalid_share(from, "disagrees on the quorum correction"));
        }
        if from != config.party_id {
            received_x.insert(from, value.x);
        }
    }

    info!(members = k, "Presign complete");
    Ok(PresignatureBundle {
        session_id: config.session_id,
        members: config.parties.clone(),
        epoch: config.epoch,
        lambda_t_i,
        signing_exponent: s_t_i.clone(),
        s_t_i,
        h_t_i,
        received_h_t_i,
        sigma_t_i,
        x_quorum: x_quorum.clone(),
        received_x,
        commitment: SigningCommitment { x_quorum, entries },
    })
}
