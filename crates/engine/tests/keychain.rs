//! End-to-end engine scenarios over the in-memory store.

use keychain_chain_params::{Network, Scheme};
use keychain_engine::{AccountKey, KeychainError, KeychainService};
use keychain_primitives::{Change, DerivationPath};
use keychain_store::InMemoryStore;
use keychain_xkeys::decode_xpub;

// BIP-44 account key (m/44'/0'/0') of the reference test mnemonic.
const BIP44_XPUB: &str = "xpub6BosfCnifzxcFwrSzQiqu2DBVTshkCXacvNsWGYJVVhhawA7d4R5WSWGFNbi8Aw6ZRc1brxMyWMzG3DSSSSoekkudhUd9yLb6qx39T9nMdj";
const BIP44_FIRST_RECEIVE: &str = "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA";

// BIP-84 account key (m/84'/0'/0') of the reference test mnemonic, with the
// first receive/change addresses from the BIP-84 test vectors.
const BIP84_ZPUB: &str = "zpub6rFR7y4Q2AijBEqTUquhVz398htDFrtymD9xYYfG1m4wAcvPhXNfE3EfH1r1ADqtfSdVCToUG868RvUUkgDKf31mGDtKsAYz2oz2AGutZYs";
const BIP84_FIRST_RECEIVE: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
const BIP84_SECOND_RECEIVE: &str = "bc1qnjg0jd8228aq7egyzacy8cys3knf9xvrerkf9g";
const BIP84_FIRST_CHANGE: &str = "bc1q8c6fshw2dlwun7ekn9qwf37cu2rn755upcp6el";

fn service() -> KeychainService<InMemoryStore> {
    KeychainService::new(InMemoryStore::new())
}

async fn legacy_keychain(service: &KeychainService<InMemoryStore>, descriptor: &str) {
    service
        .create_keychain(
            descriptor,
            AccountKey::Xpub(BIP44_XPUB.to_owned()),
            Scheme::Legacy,
            Network::BitcoinMainnet,
            None,
        )
        .await
        .unwrap();
}

fn ext(index: u32) -> DerivationPath {
    DerivationPath::new(Change::External, index).unwrap()
}

#[tokio::test]
async fn create_populates_info_and_window() {
    let service = service();
    let info = service
        .create_keychain(
            "kc",
            AccountKey::Xpub(BIP44_XPUB.to_owned()),
            Scheme::Legacy,
            Network::BitcoinMainnet,
            None,
        )
        .await
        .unwrap();

    assert_eq!(info.descriptor, "kc");
    assert_eq!(info.xpub, BIP44_XPUB);
    // Legacy mainnet has no SLIP-0132 alias: slip32 form is the xpub itself.
    assert_eq!(info.slip32_xpub, BIP44_XPUB);
    assert_eq!(info.lookahead_size, 20);
    assert_eq!(info.max_consecutive_external_index, 0);
    assert!(info.non_consecutive_external_indexes.is_empty());

    // The initial observable window is [0, 20) on both chains.
    let indexes = service
        .get_all_observable_indexes("kc", Change::External, 0, 1000)
        .await
        .unwrap();
    assert_eq!(indexes, (0..=19).collect::<Vec<u32>>());
    let indexes = service
        .get_all_observable_indexes("kc", Change::Internal, 0, 1000)
        .await
        .unwrap();
    assert_eq!(indexes.len(), 20);
}

#[tokio::test]
async fn fresh_addresses_are_idempotent_reads() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let first = service
        .get_fresh_addresses("kc", Change::External, 1)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].address, BIP44_FIRST_RECEIVE);
    assert_eq!(first[0].derivation, ext(0));

    // No mutation happened: the same batch comes back.
    let again = service
        .get_fresh_addresses("kc", Change::External, 1)
        .await
        .unwrap();
    assert_eq!(again, first);

    let batch = service
        .get_fresh_addresses("kc", Change::External, 5)
        .await
        .unwrap();
    assert_eq!(batch.len(), 5);
    assert_eq!(batch[0], first[0]);
    let indexes: Vec<u32> = batch.iter().map(|a| a.derivation.index()).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn observable_addresses_match_fresh_stream() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let observable = service
        .get_all_observable_addresses("kc", Change::External, 0, 10)
        .await
        .unwrap();
    assert_eq!(observable.len(), 11);
    assert_eq!(observable[0].address, BIP44_FIRST_RECEIVE);
    for (offset, info) in observable.iter().enumerate() {
        assert_eq!(info.derivation, ext(offset as u32));
        assert_eq!(info.change, Change::External);
    }

    let fresh = service
        .get_fresh_addresses("kc", Change::External, 11)
        .await
        .unwrap();
    assert_eq!(fresh, observable);
}

#[tokio::test]
async fn marking_fresh_address_advances_the_stream() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let first = service
        .get_fresh_address("kc", Change::External)
        .await
        .unwrap();
    service
        .mark_addresses_as_used("kc", &[first.address.clone()])
        .await
        .unwrap();

    let info = service.get_keychain_info("kc").await.unwrap();
    assert_eq!(info.max_consecutive_external_index, 1);
    assert!(info.non_consecutive_external_indexes.is_empty());

    let next = service
        .get_fresh_address("kc", Change::External)
        .await
        .unwrap();
    assert_eq!(next.derivation, ext(1));
    assert_ne!(next.address, first.address);

    // The window slid forward with the frontier: indexes [0, 21).
    let indexes = service
        .get_all_observable_indexes("kc", Change::External, 0, 1000)
        .await
        .unwrap();
    assert_eq!(indexes.last(), Some(&20));
}

#[tokio::test]
async fn gap_opens_and_closes() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    service.mark_path_as_used("kc", ext(3)).await.unwrap();

    let info = service.get_keychain_info("kc").await.unwrap();
    assert_eq!(info.max_consecutive_external_index, 0);
    assert_eq!(
        info.non_consecutive_external_indexes.iter().copied().collect::<Vec<_>>(),
        vec![3]
    );
    // One gap: the window is [0, 0 + 1 + 20).
    let indexes = service
        .get_all_observable_indexes("kc", Change::External, 0, 1000)
        .await
        .unwrap();
    assert_eq!(indexes.last(), Some(&20));

    for index in [0, 1, 2] {
        service.mark_path_as_used("kc", ext(index)).await.unwrap();
    }

    let info = service.get_keychain_info("kc").await.unwrap();
    assert_eq!(info.max_consecutive_external_index, 4);
    assert!(info.non_consecutive_external_indexes.is_empty());
}

#[tokio::test]
async fn batch_mark_commits_atomically() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let observable = service
        .get_all_observable_addresses("kc", Change::External, 0, 3)
        .await
        .unwrap();
    let batch = vec![observable[0].address.clone(), observable[3].address.clone()];
    service.mark_addresses_as_used("kc", &batch).await.unwrap();

    let info = service.get_keychain_info("kc").await.unwrap();
    assert_eq!(info.max_consecutive_external_index, 1);
    assert_eq!(
        info.non_consecutive_external_indexes.iter().copied().collect::<Vec<_>>(),
        vec![3]
    );
}

#[tokio::test]
async fn marking_is_idempotent_through_the_engine() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let first = service
        .get_fresh_address("kc", Change::External)
        .await
        .unwrap();
    service
        .mark_addresses_as_used("kc", &[first.address.clone()])
        .await
        .unwrap();
    let info_once = service.get_keychain_info("kc").await.unwrap();

    service
        .mark_addresses_as_used("kc", &[first.address])
        .await
        .unwrap();
    service.mark_path_as_used("kc", ext(0)).await.unwrap();
    let info_twice = service.get_keychain_info("kc").await.unwrap();

    assert_eq!(info_once, info_twice);
}

#[tokio::test]
async fn chains_are_independent() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let internal_fresh = service
        .get_fresh_address("kc", Change::Internal)
        .await
        .unwrap();
    service
        .mark_addresses_as_used("kc", &[internal_fresh.address])
        .await
        .unwrap();

    let info = service.get_keychain_info("kc").await.unwrap();
    assert_eq!(info.max_consecutive_internal_index, 1);
    assert_eq!(info.max_consecutive_external_index, 0);
}

#[tokio::test]
async fn unknown_address_is_not_observable() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let err = service
        .mark_addresses_as_used("kc", &["1BitcoinEaterAddressDontSendf59kuE".to_owned()])
        .await
        .unwrap_err();
    assert!(matches!(err, KeychainError::AddressNotObservable(_)));
}

#[tokio::test]
async fn path_beyond_window_is_not_observable() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let err = service
        .mark_path_as_used("kc", ext(20))
        .await
        .unwrap_err();
    assert!(matches!(err, KeychainError::AddressNotObservable(_)));

    // The very last window index is fine.
    service.mark_path_as_used("kc", ext(19)).await.unwrap();
}

#[tokio::test]
async fn observable_range_is_clipped() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let clipped = service
        .get_all_observable_addresses("kc", Change::External, 15, 100)
        .await
        .unwrap();
    let indexes: Vec<u32> = clipped.iter().map(|a| a.derivation.index()).collect();
    assert_eq!(indexes, vec![15, 16, 17, 18, 19]);

    let empty = service
        .get_all_observable_addresses("kc", Change::External, 25, 100)
        .await
        .unwrap();
    assert!(empty.is_empty());

    let inverted = service
        .get_all_observable_indexes("kc", Change::External, 9, 3)
        .await
        .unwrap();
    assert!(inverted.is_empty());
}

#[tokio::test]
async fn descriptor_lifecycle_errors() {
    let service = service();
    legacy_keychain(&service, "kc").await;

    let err = service
        .create_keychain(
            "kc",
            AccountKey::Xpub(BIP44_XPUB.to_owned()),
            Scheme::Legacy,
            Network::BitcoinMainnet,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, KeychainError::AlreadyExists(_)));

    service.delete_keychain("kc").await.unwrap();
    let err = service.get_keychain_info("kc").await.unwrap_err();
    assert!(matches!(err, KeychainError::NotFound(_)));
    let err = service.delete_keychain("kc").await.unwrap_err();
    assert!(matches!(err, KeychainError::NotFound(_)));
}

#[tokio::test]
async fn native_segwit_keychain_matches_bip84_vectors() {
    let service = service();
    let info = service
        .create_keychain(
            "kc84",
            AccountKey::Xpub(BIP84_ZPUB.to_owned()),
            Scheme::NativeSegwit,
            Network::BitcoinMainnet,
            None,
        )
        .await
        .unwrap();

    assert_eq!(info.slip32_xpub, BIP84_ZPUB);
    assert!(info.xpub.starts_with("xpub"));

    let receive = service
        .get_fresh_addresses("kc84", Change::External, 2)
        .await
        .unwrap();
    assert_eq!(receive[0].address, BIP84_FIRST_RECEIVE);
    assert_eq!(receive[1].address, BIP84_SECOND_RECEIVE);

    let change = service
        .get_fresh_address("kc84", Change::Internal)
        .await
        .unwrap();
    assert_eq!(change.address, BIP84_FIRST_CHANGE);
}

#[tokio::test]
async fn raw_account_material_reconstructs_the_xpub() {
    let params = keychain_chain_params::ChainParams::for_network(Network::BitcoinMainnet);
    let account = decode_xpub(BIP44_XPUB, params).unwrap();
    // Chain code bytes sit at offset 13 of the 78-byte payload.
    let chain_code: [u8; 32] = account.encode()[13..45].try_into().unwrap();

    let service = service();
    let info = service
        .create_keychain(
            "kc-raw",
            AccountKey::Parts {
                public_key: account.public_key.serialize().to_vec(),
                chain_code,
                account_index: 0,
            },
            Scheme::Legacy,
            Network::BitcoinMainnet,
            None,
        )
        .await
        .unwrap();

    // Parent fingerprint is unknown on reconstruction, so the serialization
    // differs from the original, but the derived addresses must not.
    let fresh = service
        .get_fresh_address("kc-raw", Change::External)
        .await
        .unwrap();
    assert_eq!(fresh.address, BIP44_FIRST_RECEIVE);
    assert_eq!(info.lookahead_size, 20);
}

#[tokio::test]
async fn custom_lookahead_drives_the_window() {
    let service = service();
    service
        .create_keychain(
            "kc-small",
            AccountKey::Xpub(BIP44_XPUB.to_owned()),
            Scheme::Legacy,
            Network::BitcoinMainnet,
            Some(5),
        )
        .await
        .unwrap();

    let indexes = service
        .get_all_observable_indexes("kc-small", Change::External, 0, 1000)
        .await
        .unwrap();
    assert_eq!(indexes, vec![0, 1, 2, 3, 4]);

    let err = service
        .mark_path_as_used("kc-small", ext(5))
        .await
        .unwrap_err();
    assert!(matches!(err, KeychainError::AddressNotObservable(_)));
}

#[tokio::test]
async fn segwit_scheme_encodes_p2sh_addresses() {
    let service = service();
    service
        .create_keychain(
            "kc49",
            AccountKey::Xpub(BIP44_XPUB.to_owned()),
            Scheme::Segwit,
            Network::BitcoinMainnet,
            None,
        )
        .await
        .unwrap();

    let fresh = service
        .get_fresh_address("kc49", Change::External)
        .await
        .unwrap();
    assert!(fresh.address.starts_with('3'), "got {}", fresh.address);

    let info = service.get_keychain_info("kc49").await.unwrap();
    assert!(info.slip32_xpub.starts_with("ypub"), "got {}", info.slip32_xpub);
}
