mod tests {
    use std::collections::BTreeSet;

    use rand::seq::SliceRandom;

    use schnorr_fun::frost::{self as secp_frost, Frost, FrostKey};
    use schnorr_fun::nonce::Deterministic;
    use schnorr_fun::{Message, Signature as SchnorrSignature};
    use secp256kfun::marker::{EvenY, Public};
    use secp256kfun::proptest::test_runner::{RngAlgorithm, TestRng};
    use secp256kfun::Scalar;
    use sha2::{Digest, Sha256};

    use secp256kfun::proptest::{
        prop_assert, prop_assert_eq, proptest,
        strategy::{Just, Strategy},
    };

    use tss_sessions::config::Params;
    use tss_sessions::engine::{AggregationError, PartialContribution, RawSignature, SigningEngine};
    use tss_sessions::frost::{FrostEngine, NONCE_LEN};
    use tss_sessions::gateway::{Gateway, PendingBatches, SignRequestMsg};
    use tss_sessions::selector::{
        AssignedParticipant, KeyInfo, KeyRegistry, ParticipantAssignment, ShareHolder, Validator,
        ValidatorSnapshot,
    };
    use tss_sessions::signer::FrostSigner;
    use tss_sessions::store::MemoryStore;
    use tss_sessions::{
        Address, ContributionOutcome, Coordinator, KeyId, ParticipantId, SessionId, SessionStatus,
        SigningRequest, TssError,
    };

    type Sha256Frost = Frost<Sha256, Deterministic<Sha256>>;

    struct Network {
        frost: Sha256Frost,
        frost_key: FrostKey<EvenY>,
        secret_shares: Vec<Scalar>,
        participants: Vec<ParticipantId>,
        keys: KeyRegistry,
        validators: ValidatorSnapshot,
        gateway: Gateway<PendingBatches>,
        coordinator: Coordinator<MemoryStore, FrostEngine<Sha256, Deterministic<Sha256>>>,
    }

    const DIGEST: [u8; 32] = [0x5a; 32];

    fn network(threshold: usize, n_parties: usize, rng: &mut TestRng) -> Network {
        let frost = secp_frost::new_with_deterministic_nonces::<Sha256>();
        let (frost_key, secret_shares) = frost.simulate_keygen(threshold, n_parties, rng);
        let frost_key = frost_key.into_xonly_key();

        // share i belongs to validator-i
        let participants: Vec<_> = (0..n_parties)
            .map(|i| ParticipantId::new(format!("validator-{}", i)))
            .collect();
        let keys = KeyRegistry::new(vec![KeyInfo {
            id: KeyId::new("master"),
            threshold: threshold as u64,
            holders: participants
                .iter()
                .map(|p| ShareHolder {
                    participant: p.clone(),
                    weight: 1,
                })
                .collect(),
            revoked: false,
        }]);
        let validators = ValidatorSnapshot::new(
            1,
            participants
                .iter()
                .map(|p| Validator {
                    id: p.clone(),
                    active: true,
                })
                .collect(),
        );
        let mut batches = PendingBatches::new();
        batches.set("ethereum", DIGEST.to_vec());

        let engine = FrostEngine::with_keys(
            frost.clone(),
            vec![(KeyId::new("master"), frost_key.clone())],
        );
        Network {
            frost,
            frost_key,
            secret_shares,
            participants,
            keys,
            validators,
            gateway: Gateway::from_params(&Params::default(), batches),
            coordinator: Coordinator::new(MemoryStore::new(), engine, 20),
        }
    }

    impl Network {
        fn submit(&mut self, height: u64) -> Result<SessionId, TssError> {
            let msg = SignRequestMsg {
                sender: Address::from_bytes(vec![0x11; 20]),
                chain: "ethereum".into(),
                key_id: KeyId::new("master"),
            };
            self.gateway.submit(
                &mut self.coordinator,
                &self.keys,
                &self.validators,
                msg,
                height,
            )
        }

        /// Contributions from the signers at `indexes`, all signed under the same nonce set.
        fn contributions(&self, indexes: &[usize], rng: &mut TestRng) -> Vec<(usize, Vec<u8>)> {
            let (mut signers, nonces): (Vec<_>, Vec<_>) = indexes
                .iter()
                .map(|i| {
                    FrostSigner::new(
                        rng,
                        self.frost.clone(),
                        self.frost_key.clone(),
                        *i,
                        self.secret_shares[*i].clone(),
                    )
                })
                .unzip();
            let nonce_set: Vec<_> = indexes.iter().cloned().zip(nonces).collect();
            signers
                .iter_mut()
                .map(|signer| {
                    let (contribution, _next_nonce) =
                        signer.sign(rng, &DIGEST, &nonce_set).expect("valid nonce set");
                    (signer.index(), contribution)
                })
                .collect()
        }
    }

    #[test]
    fn test_2_of_3_basic() {
        let mut rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
        let mut net = network(2, 3, &mut rng);

        let session_id = net.submit(10).unwrap();
        let contributions = net.contributions(&[0, 2], &mut rng);

        let (index, contribution) = contributions[0].clone();
        let outcome = net
            .coordinator
            .contribute(session_id, &net.participants[index], contribution)
            .unwrap();
        assert_eq!(
            outcome,
            ContributionOutcome::Recorded {
                collected: 1,
                threshold: 2
            }
        );

        let (index, contribution) = contributions[1].clone();
        let signature = match net
            .coordinator
            .contribute(session_id, &net.participants[index], contribution)
            .unwrap()
        {
            ContributionOutcome::Completed { signature } => signature,
            other => panic!("expected a signature, got {:?}", other),
        };

        // The stored (R, S) is a valid BIP340 signature under the joint key
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&signature.r);
        bytes[32..].copy_from_slice(&signature.s);
        let schnorr_sig = SchnorrSignature::from_bytes(bytes).expect("well formed signature");
        assert!(net.frost.schnorr.verify(
            &net.frost_key.public_key(),
            Message::<Public>::raw(&DIGEST),
            &schnorr_sig
        ));
        assert_eq!(
            net.coordinator.signature(session_id).unwrap(),
            Some(signature)
        );

        // The third validator is too late
        let late = net.contributions(&[1, 2], &mut rng);
        assert!(matches!(
            net.coordinator
                .contribute(session_id, &net.participants[1], late[0].1.clone()),
            Err(TssError::NotPending {
                status: SessionStatus::Completed,
                ..
            })
        ));
    }

    #[test]
    fn malicious_share_fails_session_and_resubmission_recovers() {
        let mut rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
        let mut net = network(3, 5, &mut rng);

        let first = net.submit(0).unwrap();
        let mut contributions = net.contributions(&[0, 1, 3], &mut rng);
        // validator-1 sends a bogus share alongside its honest nonce
        let bogus = Scalar::random(&mut rng).mark_zero().public();
        contributions[1].1.truncate(NONCE_LEN);
        contributions[1].1.extend_from_slice(&bogus.to_bytes());

        let mut outcome = None;
        for (index, contribution) in contributions {
            outcome = Some(
                net.coordinator
                    .contribute(first, &net.participants[index], contribution)
                    .unwrap(),
            );
        }
        assert_eq!(
            outcome,
            Some(ContributionOutcome::Failed {
                reason: "invalid signature share from validator-1".into()
            })
        );
        let failed = net.coordinator.session(first).unwrap().unwrap();
        assert_eq!(failed.status(), SessionStatus::Failed);
        assert_eq!(net.coordinator.signature(first).unwrap(), None);

        // A fresh session, signed without the misbehaving validator, completes
        let second = net.submit(1).unwrap();
        assert_ne!(first, second);
        let mut completed = false;
        for (index, contribution) in net.contributions(&[0, 2, 4], &mut rng) {
            if let ContributionOutcome::Completed { .. } = net
                .coordinator
                .contribute(second, &net.participants[index], contribution)
                .unwrap()
            {
                completed = true;
            }
        }
        assert!(completed);
    }

    #[test]
    fn silent_committee_expires_and_request_can_be_retried() {
        let mut rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
        let mut net = network(2, 3, &mut rng);

        let first = net.submit(80).unwrap();
        assert!(matches!(
            net.submit(81),
            Err(TssError::DuplicateRequest { session, .. }) if session == first
        ));

        assert!(net.coordinator.expire(100).unwrap().is_empty());
        assert_eq!(net.coordinator.expire(101).unwrap(), vec![first]);
        assert_eq!(net.coordinator.signature(first).unwrap(), None);

        let second = net.submit(101).unwrap();
        assert_eq!(second, SessionId(first.0 + 1));
    }

    /// Deterministic stand-in for the cryptography, for properties of the state machine itself.
    struct HashEngine;

    impl SigningEngine for HashEngine {
        fn aggregate(
            &self,
            key_id: &KeyId,
            digest: &[u8],
            contributions: &[PartialContribution<'_>],
        ) -> Result<RawSignature, AggregationError> {
            let mut hasher = Sha256::new();
            hasher.update(key_id.as_str().as_bytes());
            hasher.update(digest);
            for c in contributions {
                hasher.update(c.participant.as_str().as_bytes());
                hasher.update(c.payload);
            }
            let r = hasher.finalize().to_vec();
            Ok(RawSignature {
                s: Sha256::digest(&r).to_vec(),
                r,
            })
        }
    }

    fn weighted_assignment(threshold: u64, weights: &[u64]) -> ParticipantAssignment {
        ParticipantAssignment {
            key_id: KeyId::new("master"),
            snapshot_height: 0,
            threshold,
            participants: weights
                .iter()
                .enumerate()
                .map(|(i, weight)| AssignedParticipant {
                    participant: ParticipantId::new(format!("p{:02}", i)),
                    weight: *weight,
                    share_index: i as u32,
                })
                .collect(),
        }
    }

    fn request(scope: &str) -> SigningRequest {
        SigningRequest::new(
            Address::from_bytes(vec![0x22; 32]),
            KeyId::new("master"),
            scope,
            DIGEST.to_vec(),
        )
        .unwrap()
    }

    type Trace = (Vec<(Vec<u8>, Vec<u8>)>, Vec<String>);

    /// Opens one session, replays `order` (with every participant trying twice), then ticks.
    fn replay(threshold: u64, weights: &[u64], order: &[usize], expire_at: u64) -> Trace {
        let mut coordinator = Coordinator::new(MemoryStore::new(), HashEngine, 10);
        let assignment = weighted_assignment(threshold, weights);
        let session = coordinator.open(request("ethereum"), assignment, 0).unwrap();
        let mut log = vec![];
        for index in order.iter().chain(order.iter()) {
            let participant = ParticipantId::new(format!("p{:02}", index));
            let result = coordinator.contribute(session.id(), &participant, vec![*index as u8 + 1]);
            log.push(format!("{:?}", result));
        }
        log.push(format!("{:?}", coordinator.expire(expire_at)));
        (coordinator.kv().dump(), log)
    }

    fn weights_and_order() -> impl Strategy<Value = (Vec<u64>, u64, Vec<usize>)> {
        (1usize..8)
            .prop_flat_map(|n| secp256kfun::proptest::collection::vec(1u64..5, n))
            .prop_flat_map(|weights| {
                let total: u64 = weights.iter().sum();
                let order: Vec<usize> = (0..weights.len()).collect();
                (Just(weights), 1..=total, Just(order).prop_shuffle())
            })
    }

    proptest! {
        #[test]
        fn proptest_completes_exactly_on_crossing_contribution(
            (weights, threshold, order) in weights_and_order()
        ) {
            let mut coordinator = Coordinator::new(MemoryStore::new(), HashEngine, 10);
            let session = coordinator
                .open(request("ethereum"), weighted_assignment(threshold, &weights), 0)
                .unwrap();

            let mut running = 0u64;
            let mut completed = false;
            for index in &order {
                let participant = ParticipantId::new(format!("p{:02}", index));
                let result = coordinator.contribute(session.id(), &participant, vec![1]);
                if completed {
                    let is_not_pending = matches!(result, Err(TssError::NotPending { .. }));
                    prop_assert!(is_not_pending);
                    continue;
                }
                running += weights[*index];
                match result.unwrap() {
                    ContributionOutcome::Recorded { collected, .. } => {
                        prop_assert!(running < threshold);
                        prop_assert_eq!(collected, running);
                    }
                    ContributionOutcome::Completed { .. } => {
                        prop_assert!(running >= threshold);
                        prop_assert!(running - weights[*index] < threshold);
                        completed = true;
                    }
                    ContributionOutcome::Failed { reason } => {
                        prop_assert!(false, "unexpected failure {}", reason);
                    }
                }
            }
            // the threshold never exceeds the total weight, so every run completes
            prop_assert!(completed);
            let stored = coordinator.session(session.id()).unwrap().unwrap();
            prop_assert_eq!(stored.status(), SessionStatus::Completed);
        }

        #[test]
        fn proptest_replay_is_deterministic(
            (weights, threshold, order) in weights_and_order(),
            cut in 0usize..8,
            expire_at in 0u64..20,
        ) {
            let order = &order[..cut.min(order.len())];
            prop_assert_eq!(
                replay(threshold, &weights, order, expire_at),
                replay(threshold, &weights, order, expire_at)
            );
        }

        #[test]
        fn proptest_at_most_one_contribution_per_participant(
            (weights, _threshold, order) in weights_and_order()
        ) {
            let total: u64 = weights.iter().sum();
            // leaving one participant out keeps the session pending
            let order = &order[..order.len() - 1];
            let (_, log) = replay(total, &weights, order, 0);
            let accepted = log.iter().filter(|l| l.starts_with("Ok(")).count();
            // every first attempt plus the expiry tick
            prop_assert_eq!(accepted, order.len() + 1);
            let duplicates = log
                .iter()
                .filter(|l| l.contains("DuplicateContribution"))
                .count();
            prop_assert_eq!(duplicates, order.len());
        }
    }

    #[test]
    fn signatures_are_immutable_once_observed() {
        let mut coordinator = Coordinator::new(MemoryStore::new(), HashEngine, 10);
        let session = coordinator
            .open(request("ethereum"), weighted_assignment(1, &[1, 1]), 0)
            .unwrap();
        coordinator
            .contribute(session.id(), &ParticipantId::new("p00"), vec![1])
            .unwrap();
        let first = coordinator.signature(session.id()).unwrap();
        assert!(first.is_some());

        let mut rng = TestRng::deterministic_rng(RngAlgorithm::ChaCha);
        let mut noise: Vec<u64> = (0..10).collect();
        noise.shuffle(&mut rng);
        for height in noise {
            coordinator.expire(height * 100).unwrap();
            let _ = coordinator.contribute(session.id(), &ParticipantId::new("p01"), vec![2]);
            assert_eq!(coordinator.signature(session.id()).unwrap(), first);
        }

        // signature records live under 0x05
        let distinct: BTreeSet<_> = coordinator
            .kv()
            .dump()
            .into_iter()
            .map(|(k, _)| k)
            .filter(|k| k.first() == Some(&0x05))
            .collect();
        assert_eq!(distinct.len(), 1);
    }
}
