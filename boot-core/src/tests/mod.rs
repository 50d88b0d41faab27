use crate::layout::Region;
use crate::store::PersistedState;
use crate::{Completed, Fault, KeyMaterial, KeySet, StoreError, Terminal};
use consts::{ERASED_BYTE, PAGE_SIZE, UPDATE_PAGES, WATCHDOG_TIMEOUT_MS};
use host_protocol::{
    assemble_plaintext, Mode, ReadbackRequest, ACK, ENCRYPTED_BYTES, MAX_IMAGE_SIZE, NACK, READBACK_BODY_SIZE,
};
use mock::Harness;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shielded_aes::{cbc_mac, CfbStream, Direction, Lfsr16};
use std::vec;
use std::vec::Vec;


const PASSWORD: [u8; 24] = *b"open sesame, said ali ba";

fn material() -> KeyMaterial {
    KeyMaterial {
        firmware_key: [0x11; 32],
        firmware_hash_key: [0x22; 32],
        firmware_iv: [0x33; 16],
        readback_key: [0x44; 32],
        readback_hash_key: [0x55; 32],
        readback_iv: [0x66; 16],
        readback_password: PASSWORD,
    }
}

fn keys() -> KeySet {
    KeySet::new(material()).unwrap()
}

fn rng() -> Lfsr16 {
    Lfsr16::new(core::num::NonZeroU16::new(777).unwrap())
}

fn image(len: usize, seed: u64) -> Vec<u8> {
    let mut image = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill(&mut image[..]);
    image
}

/// Builds an update package the way the host tools do.
fn package(version: u16, message: &[u8], image: &[u8]) -> Vec<u8> {
    let m = material();
    let mut rng = rng();
    let mut body = vec![0x5a; ENCRYPTED_BYTES];
    assemble_plaintext(version, message, image, body.as_mut_slice().try_into().unwrap()).unwrap();
    CfbStream::new(&m.firmware_key, &m.firmware_iv, Direction::Encrypt, &mut rng)
        .apply(&mut body, &mut rng)
        .unwrap();
    let tag = cbc_mac(&m.firmware_hash_key, &body, &mut rng).unwrap();
    body.extend_from_slice(&tag);
    body.resize(UPDATE_PAGES as usize * PAGE_SIZE, 0xa7);
    body
}

fn readback_request(password: &[u8; 24], start: u32, length: u32) -> Vec<u8> {
    let m = material();
    let mut rng = rng();
    let mut body = ReadbackRequest {
        password: *password,
        start,
        length,
    }
    .to_bytes();
    CfbStream::new(&m.readback_key, &m.readback_iv, Direction::Encrypt, &mut rng)
        .apply(&mut body, &mut rng)
        .unwrap();
    let tag = cbc_mac(&m.readback_hash_key, &body, &mut rng).unwrap();
    [&body[..], &tag[..]].concat()
}

fn state(fw_version: u16) -> PersistedState {
    PersistedState {
        fw_version,
        ..PersistedState::default()
    }
}

fn erased(pages: u16) -> Vec<u8> {
    vec![ERASED_BYTE; pages as usize * PAGE_SIZE]
}

fn padded(data: &[u8], pages: u16) -> Vec<u8> {
    let mut out = data.to_vec();
    out.resize(pages as usize * PAGE_SIZE, ERASED_BYTE);
    out
}

fn update_acks(n: usize) -> Vec<u8> {
    let mut expected = vec![b'U'];
    expected.extend(std::iter::repeat(ACK).take(n));
    expected
}

#[test]
fn update_installs_firmware_and_message() {
    let firmware = image(20_000, 1);
    let mut board = Harness::with_state(state(1));
    board.send(&package(3, b"Version 3: now with fewer bugs", &firmware));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::Updated { version: 3 })));
    assert_eq!(board.output(), &update_acks(UPDATE_PAGES as usize + 1)[..]);
    assert_eq!(board.pages(Region::Application.pages()), padded(&firmware, Region::Application.page_count()));
    assert_eq!(
        board.pages(Region::Message.pages()),
        padded(b"Version 3: now with fewer bugs\0", Region::Message.page_count())
    );
    assert_eq!(board.pages(Region::EncryptedScratch.pages()), erased(Region::EncryptedScratch.page_count()));
    assert_eq!(board.pages(Region::DecryptedScratch.pages()), erased(Region::DecryptedScratch.page_count()));
    assert_eq!(board.state().fw_version, 3);

    assert_eq!(board.shared.armed_ms.get(), Some(WATCHDOG_TIMEOUT_MS));
    assert!(board.shared.scopes.get() >= 2);
    assert!(board.shared.max_work.get() <= mock::WORK_BUDGET);
}

#[test]
fn update_with_full_size_image() {
    let firmware = image(MAX_IMAGE_SIZE, 2);
    let mut board = Harness::new();
    board.send(&package(2, b"", &firmware));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::Updated { version: 2 })));
    assert_eq!(board.pages(Region::Application.pages()), firmware);
    let message = board.pages(Region::Message.pages());
    assert_eq!(message[0], 0);
}

#[test]
fn corrupted_mac_leaves_application_untouched() {
    let old = image(4096, 3);
    let mut board = Harness::with_state(state(2));
    board.plant(Region::Application.first_page(), &old);

    let mut pkg = package(3, b"new", &image(8192, 4));
    let mac_offset = (UPDATE_PAGES as usize - 1) * PAGE_SIZE;
    pkg[mac_offset + 7] ^= 0x01;
    board.send(&pkg);

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::AuthenticationFailure)));
    assert_eq!(board.output().last(), Some(&NACK));
    assert_eq!(board.pages(Region::EncryptedScratch.pages()), erased(Region::EncryptedScratch.page_count()));
    assert_eq!(board.pages(Region::DecryptedScratch.pages()), erased(Region::DecryptedScratch.page_count()));
    assert_eq!(board.pages(Region::Application.pages()), padded(&old, Region::Application.page_count()));
    assert_eq!(board.state().fw_version, 2);
}

#[test]
fn corrupted_ciphertext_is_rejected() {
    let mut board = Harness::new();
    let mut pkg = package(3, b"", &image(1000, 5));
    pkg[60 * PAGE_SIZE + 3] ^= 0x80;
    board.send(&pkg);

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::AuthenticationFailure)));
    assert_eq!(board.pages(Region::EncryptedScratch.pages()), erased(Region::EncryptedScratch.page_count()));
    assert_eq!(board.pages(Region::Application.pages()), erased(Region::Application.page_count()));
}

#[test]
fn package_for_other_keys_is_rejected() {
    let mut other = material();
    other.firmware_hash_key = [0x77; 32];
    let other = KeySet::new(other).unwrap();

    let mut board = Harness::new();
    board.send(&package(3, b"", &image(1000, 6)));
    let (terminal, _) = board.run(&other, Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::AuthenticationFailure)));
}

#[test]
fn downgrade_is_rejected_and_scratch_wiped() {
    let old = image(512, 7);
    let mut board = Harness::with_state(state(5));
    board.plant(Region::Application.first_page(), &old);
    board.send(&package(4, b"older", &image(2048, 8)));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::DowngradeRejected)));
    assert_eq!(board.output().last(), Some(&NACK));
    assert_eq!(board.pages(Region::EncryptedScratch.pages()), erased(Region::EncryptedScratch.page_count()));
    assert_eq!(board.pages(Region::DecryptedScratch.pages()), erased(Region::DecryptedScratch.page_count()));
    assert_eq!(board.pages(Region::Application.pages()), padded(&old, Region::Application.page_count()));
    assert_eq!(board.state().fw_version, 5);
}

#[test]
fn same_version_is_accepted() {
    let mut board = Harness::with_state(state(5));
    board.send(&package(5, b"", &image(100, 9)));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::Updated { version: 5 })));
    assert_eq!(board.state().fw_version, 5);
}

#[test]
fn debug_build_skips_version_check_and_store() {
    let firmware = image(3000, 10);
    let mut board = Harness::with_state(state(9));
    board.send(&package(0, b"debug", &firmware));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::Updated { version: 0 })));
    assert_eq!(board.pages(Region::Application.pages()), padded(&firmware, Region::Application.page_count()));
    assert_eq!(board.state().fw_version, 9);
}

#[test]
fn version_sequence_is_monotonic() {
    let mut board = Harness::new();
    for (version, accepted, stored) in [(3, true, 3), (2, false, 3), (0, true, 3), (3, true, 3), (7, true, 7), (1, false, 7)] {
        board.send(&package(version, b"", &image(256, u64::from(version))));
        let (terminal, next) = board.run(&keys(), Mode::Update);
        let mut next = next.reboot();
        match terminal {
            Terminal::AwaitReset(Ok(Completed::Updated { version: v })) => {
                assert!(accepted, "version {version} should have been rejected");
                assert_eq!(v, version);
            }
            Terminal::AwaitReset(Err(Fault::DowngradeRejected)) => assert!(!accepted, "version {version} rejected"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(next.state().fw_version, stored);
        board = next;
    }
}

#[test]
fn truncated_upload_stalls_without_nack() {
    let pkg = package(3, b"", &image(100, 11));
    let mut board = Harness::new();
    board.send(&pkg[..10 * PAGE_SIZE + 17]);

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::LinkStalled)));
    assert_eq!(board.output(), &update_acks(10)[..]);
    assert_eq!(board.pages(Region::Application.pages()), erased(Region::Application.page_count()));
    assert_eq!(board.pages(Region::EncryptedScratch.pages()), erased(Region::EncryptedScratch.page_count()));
}

#[test]
fn store_failure_after_decrypt_wipes_scratch() {
    let mut board = Harness::with_state(state(2));
    // The boot-time seed save goes through, the version save does not.
    board.shared.saves_left.set(Some(1));
    board.send(&package(3, b"secret notes", &image(6000, 15)));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::Store(StoreError::Backend))));
    assert_eq!(board.output(), &update_acks(UPDATE_PAGES as usize)[..]);
    assert_eq!(board.pages(Region::EncryptedScratch.pages()), erased(Region::EncryptedScratch.page_count()));
    assert_eq!(board.pages(Region::DecryptedScratch.pages()), erased(Region::DecryptedScratch.page_count()));
    assert_eq!(board.pages(Region::Application.pages()), erased(Region::Application.page_count()));
    assert_eq!(board.state().fw_version, 2);
}

#[test]
fn flash_failure_during_install_wipes_scratch() {
    let mut board = Harness::new();
    board.shared.broken_page.set(Region::Application.page(3));
    board.send(&package(3, b"", &image(8000, 16)));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::Flash)));
    assert_eq!(board.output().last(), Some(&ACK));
    assert_eq!(board.output().len(), 1 + UPDATE_PAGES as usize);
    assert_eq!(board.pages(Region::EncryptedScratch.pages()), erased(Region::EncryptedScratch.page_count()));
    assert_eq!(board.pages(Region::DecryptedScratch.pages()), erased(Region::DecryptedScratch.page_count()));
}

#[test]
fn flash_failure_during_decrypt_wipes_scratch() {
    let mut board = Harness::new();
    board.shared.broken_page.set(Region::DecryptedScratch.page(40));
    board.send(&package(3, b"", &image(20_000, 17)));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::Flash)));
    assert_eq!(board.pages(Region::EncryptedScratch.pages()), erased(Region::EncryptedScratch.page_count()));
    assert_eq!(board.pages(Region::DecryptedScratch.pages()), erased(Region::DecryptedScratch.page_count()));
    assert_eq!(board.pages(Region::Application.pages()), erased(Region::Application.page_count()));
}

#[test]
fn scratch_wipe_continues_past_a_bad_page() {
    let bad = Region::EncryptedScratch.page(5).unwrap();
    let mut board = Harness::new();
    board.shared.broken_page.set(Some(bad));
    board.send(&package(3, b"", &image(1000, 18)));

    let (terminal, mut board) = board.run(&keys(), Mode::Update);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::Flash)));
    assert_eq!(board.output(), &update_acks(5)[..]);
    let first = Region::EncryptedScratch.first_page();
    assert_eq!(board.pages(first..bad), erased(5));
    assert_eq!(board.pages(bad + 1..Region::EncryptedScratch.pages().end), erased(Region::EncryptedScratch.page_count() - 6));
    assert_eq!(board.pages(Region::DecryptedScratch.pages()), erased(Region::DecryptedScratch.page_count()));
}

fn decrypt_readback(stream: &[u8]) -> Vec<u8> {
    let m = material();
    let mut rng = rng();
    let mut data = stream.to_vec();
    CfbStream::new(&m.readback_key, &m.readback_iv, Direction::Decrypt, &mut rng)
        .apply(&mut data, &mut rng)
        .unwrap();
    data
}

#[test]
fn readback_streams_encrypted_pages() {
    let contents = image(10 * PAGE_SIZE, 12);
    let mut board = Harness::new();
    board.plant(0, &contents);
    board.send(&readback_request(&PASSWORD, 0x300, 0x200));

    let (terminal, board) = board.run(&keys(), Mode::Readback);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::ReadBack { pages: 2 })));
    let output = board.output();
    assert_eq!(output[0], b'R');
    assert_eq!(output.len(), 1 + 2 * PAGE_SIZE);
    assert_ne!(&output[1..], &contents[3 * PAGE_SIZE..5 * PAGE_SIZE]);
    assert_eq!(decrypt_readback(&output[1..]), &contents[3 * PAGE_SIZE..5 * PAGE_SIZE]);
    assert!(board.shared.max_work.get() <= mock::WORK_BUDGET);
}

#[test]
fn readback_inside_bootloader_is_clamped() {
    let mut board = Harness::new();
    board.plant(Region::Bootloader.first_page(), &[0xb0; 16 * PAGE_SIZE]);
    board.plant(Region::Message.first_page(), &image(4 * PAGE_SIZE, 13));
    let expected = board.pages(Region::Message.pages().end - 1..Region::Message.pages().end);
    let start = u32::from(Region::Bootloader.first_page()) * PAGE_SIZE as u32;
    board.send(&readback_request(&PASSWORD, start, 8 * PAGE_SIZE as u32));

    let (terminal, board) = board.run(&keys(), Mode::Readback);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::ReadBack { pages: 1 })));
    let plain = decrypt_readback(&board.output()[1..]);
    assert_eq!(plain, expected);
    assert!(!plain.windows(16).any(|w| w == [0xb0; 16]));
}

#[test]
fn readback_zero_length_sends_nothing() {
    let mut board = Harness::new();
    board.send(&readback_request(&PASSWORD, 0, 0));

    let (terminal, board) = board.run(&keys(), Mode::Readback);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::ReadBack { pages: 0 })));
    assert_eq!(board.output(), b"R");
}

#[test]
fn readback_with_bad_mac_is_refused() {
    let mut board = Harness::new();
    board.plant(0, &[0x42; PAGE_SIZE]);
    let mut request = readback_request(&PASSWORD, 0, 256);
    request[READBACK_BODY_SIZE] ^= 0x04;
    board.send(&request);

    let (terminal, board) = board.run(&keys(), Mode::Readback);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::AuthenticationFailure)));
    assert_eq!(board.output(), &[b'R', NACK]);
}

#[test]
fn readback_with_wrong_password_is_refused() {
    let mut board = Harness::new();
    let mut password = PASSWORD;
    password[23] ^= 0x20;
    board.send(&readback_request(&password, 0, 256));

    let (terminal, board) = board.run(&keys(), Mode::Readback);

    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::AuthorizationFailure)));
    assert_eq!(board.output(), &[b'R', NACK]);
}

#[test]
fn configure_reports_fingerprint_and_seals() {
    let bootloader = image(Region::Bootloader.page_count() as usize * PAGE_SIZE, 14);
    let mut board = Harness::new();
    board.plant(Region::Bootloader.first_page(), &bootloader);
    board.send(&[0x00, ACK, ACK]);

    let (terminal, board) = board.run(&keys(), Mode::Configure);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::Configured { sealed: true })));
    let expected = cbc_mac(&material().firmware_hash_key, &bootloader, &mut rng()).unwrap();
    assert_eq!(board.output()[0], b'C');
    assert_eq!(&board.output()[1..], &expected);
    assert!(board.shared.scopes.get() >= 1);

    let mut board = board.reboot();
    assert!(board.state().configured);
    board.send(&[ACK]);
    let (terminal, board) = board.run(&keys(), Mode::Configure);
    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::AlreadySealed)));
    assert_eq!(board.output(), &[b'C', NACK]);
}

#[test]
fn configure_rejected_by_host_stays_unsealed() {
    let mut board = Harness::new();
    board.send(&[ACK, NACK]);

    let (terminal, board) = board.run(&keys(), Mode::Configure);

    assert_eq!(terminal, Terminal::AwaitReset(Ok(Completed::Configured { sealed: false })));
    assert!(!board.reboot().state().configured);
}

#[test]
fn configure_without_host_stalls() {
    let board = Harness::new();
    let (terminal, board) = board.run(&keys(), Mode::Configure);
    assert_eq!(terminal, Terminal::AwaitReset(Err(Fault::LinkStalled)));
    assert_eq!(board.output(), b"C");
}

#[test]
fn run_prints_message_and_launches() {
    let mut board = Harness::new();
    board.plant(Region::Message.first_page(), b"hello from v3\0");

    let (terminal, board) = board.run(&keys(), Mode::Run);

    assert_eq!(terminal, Terminal::Launch);
    assert_eq!(board.io.console.as_bytes(), b"hello from v3\n");
    assert_eq!(board.output(), b"B");
    assert!(board.shared.disabled.get());
}

#[test]
fn run_prints_message_spanning_pages() {
    let mut message = vec![b'a'; PAGE_SIZE + 10];
    message.push(0);
    let mut board = Harness::new();
    board.plant(Region::Message.first_page(), &message);

    let (terminal, board) = board.run(&keys(), Mode::Run);

    assert_eq!(terminal, Terminal::Launch);
    let printed = board.io.console.as_bytes();
    assert_eq!(printed.len(), PAGE_SIZE + 11);
    assert!(printed[..PAGE_SIZE + 10].iter().all(|&b| b == b'a'));
    assert_eq!(printed.last(), Some(&b'\n'));
}

#[test]
fn run_without_message_prints_nothing() {
    let board = Harness::new();
    let (terminal, board) = board.run(&keys(), Mode::Run);
    assert_eq!(terminal, Terminal::Launch);
    assert!(board.io.console.as_bytes().is_empty());
    assert!(board.shared.disabled.get());
}

#[test]
fn every_boot_advances_the_clock_seed() {
    let mut seeds = Vec::new();
    let mut board = Harness::new();
    for _ in 0..3 {
        let (_, next) = board.run(&keys(), Mode::Run);
        seeds.push(next.shared.seed.get().unwrap().get());
        let mut next = next.reboot();
        assert_eq!(next.state().lfsr_seed, *seeds.last().unwrap());
        board = next;
    }
    assert_ne!(seeds[0], consts::FACTORY_LFSR_SEED);
    assert_ne!(seeds[0], seeds[1]);
    assert_ne!(seeds[1], seeds[2]);
}
