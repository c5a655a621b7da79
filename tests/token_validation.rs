use std::sync::Arc;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::{X509, X509NameBuilder};
use tokio_util::sync::CancellationToken;

use token_trust::crypto::rsa::RsaPrivateKey;
use token_trust::dsig::sign_token;
use token_trust::metadata::{
    ConfigurationManager, DocumentRetriever, IssuerMetadataRetriever, LkgConfigurationManager,
    MetadataError, StaticDocumentRetriever, TrustConfiguration,
};
use token_trust::telemetry;
use token_trust::validator::{TokenValidator, ValidationError};

const METADATA_ADDRESS: &str = "https://issuer.example.test/federationmetadata.xml";

fn issuer_key() -> (PKey<Private>, RsaPrivateKey) {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();
    let signing = RsaPrivateKey::from_der(&pkey.private_key_to_der().unwrap()).unwrap();
    (pkey, signing)
}

fn self_signed_certificate(key: &PKey<Private>) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "token-trust test issuer").unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(159, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(7).unwrap())
        .unwrap();
    builder.sign(key, MessageDigest::sha256()).unwrap();
    builder.build()
}

fn metadata_document(certificate_der: &[u8]) -> String {
    format!(
        r#"<EntityDescriptor entityID="https://issuer.example.test"><KeyDescriptor use="signing"><KeyInfo><X509Data><X509Certificate>{}</X509Certificate></X509Data></KeyInfo></KeyDescriptor></EntityDescriptor>"#,
        BASE64.encode(certificate_der)
    )
}

#[tokio::test]
async fn validates_signed_tokens_against_published_metadata() {
    telemetry::init_tracing();

    let (pkey, signing_key) = issuer_key();
    let certificate = self_signed_certificate(&pkey);
    let metadata_xml = metadata_document(&certificate.to_der().unwrap());

    let manager = ConfigurationManager::new(
        METADATA_ADDRESS,
        Arc::new(StaticDocumentRetriever::new(metadata_xml.into_bytes())),
        Arc::new(IssuerMetadataRetriever),
    );
    let overlay = Arc::new(LkgConfigurationManager::new(manager));
    let validator = TokenValidator::new(Arc::clone(&overlay));
    let cancellation = CancellationToken::new();

    let token = sign_token(
        "<Token><Claims>alice@example.test</Claims></Token>",
        "Claims",
        &signing_key,
    )
    .unwrap();

    let configuration = validator.validate(&token, &cancellation).await.unwrap();
    assert_eq!(configuration.entity_id, "https://issuer.example.test");
    assert!(!configuration.is_last_known_good());

    // The caller, satisfied with the validation, promotes the configuration
    // and routes subsequent reads to the promoted copy
    validator.promote_last_known_good().await.unwrap();
    overlay.set_use_lkg(true);
    let promoted = validator.validate(&token, &cancellation).await.unwrap();
    assert!(promoted.is_last_known_good());
    overlay.set_use_lkg(false);

    let tampered = token.replace("alice@example.test", "eve@example.test");
    let err = validator.validate(&tampered, &cancellation).await.unwrap_err();
    assert!(matches!(err, ValidationError::Signature(_)));

    // The failed validation never disturbs the promoted copy
    let lkg = overlay.lkg_configuration().await.unwrap();
    assert!(lkg.is_last_known_good());
}

#[tokio::test]
async fn rejects_tokens_signed_by_an_unpublished_key() {
    let (pkey, _) = issuer_key();
    let certificate = self_signed_certificate(&pkey);
    let metadata_xml = metadata_document(&certificate.to_der().unwrap());

    let manager = ConfigurationManager::new(
        METADATA_ADDRESS,
        Arc::new(StaticDocumentRetriever::new(metadata_xml.into_bytes())),
        Arc::new(IssuerMetadataRetriever),
    );
    let overlay = Arc::new(LkgConfigurationManager::new(manager));
    let validator = TokenValidator::new(overlay);

    // Signed by a key the metadata never published
    let (_, rogue_key) = issuer_key();
    let token = sign_token("<Token><Claims>x</Claims></Token>", "Claims", &rogue_key).unwrap();

    let err = validator
        .validate(&token, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::Signature(_)));
}

mockall::mock! {
    pub Documents {}

    #[async_trait::async_trait]
    impl DocumentRetriever for Documents {
        async fn fetch(&self, address: &str) -> Result<Vec<u8>, MetadataError>;
    }
}

#[tokio::test(start_paused = true)]
async fn stale_metadata_is_served_when_the_source_goes_down() {
    let (pkey, _) = issuer_key();
    let certificate = self_signed_certificate(&pkey);
    let metadata_bytes = metadata_document(&certificate.to_der().unwrap()).into_bytes();

    let mut documents = MockDocuments::new();
    let mut sequence = mockall::Sequence::new();
    documents
        .expect_fetch()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(move |_| Ok(metadata_bytes.clone()));
    documents
        .expect_fetch()
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|address| {
            Err(MetadataError::Retrieval {
                address: address.to_string(),
                reason: "connection reset".to_string(),
            })
        });

    let manager = ConfigurationManager::new(
        METADATA_ADDRESS,
        Arc::new(documents),
        Arc::new(IssuerMetadataRetriever),
    )
    .with_intervals(Duration::from_secs(30 * 60), Duration::from_secs(5 * 60));
    let cancellation = CancellationToken::new();

    let fresh = manager.get_configuration(&cancellation).await.unwrap();

    tokio::time::advance(Duration::from_secs(31 * 60)).await;
    let stale = manager.get_configuration(&cancellation).await.unwrap();
    assert!(
        Arc::ptr_eq(&fresh, &stale),
        "the previously fetched document keeps being served"
    );
}
