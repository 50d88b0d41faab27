use {
    self::device::{Device, Setup},
    crate::{package, readback, secrets::Secrets, session, ExitCode},
    boot_core::{store::PersistedState, store::StateStore, Completed, Fault, Terminal},
    consts::{
        APPLICATION_PAGES, BOOTLOADER_FIRST_PAGE, BOOTLOADER_PAGES, ERASED_BYTE, MESSAGE_FIRST_PAGE, MESSAGE_PAGES,
        PAGE_SIZE,
    },
    host_protocol::{version_of, Mode, ENCRYPTED_BYTES, MAX_IMAGE_SIZE, TAG_SIZE},
    rand::{rngs::StdRng, Rng, SeedableRng},
    shielded_aes::{cbc_mac, CfbStream, Direction},
    std::io::Write,
};


fn secrets(seed: u64) -> Secrets {
    Secrets::generate(&mut StdRng::seed_from_u64(seed))
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(0xb007)
}

fn image(len: usize, seed: u64) -> Vec<u8> {
    let mut image = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill(&mut image[..]);
    image
}

fn padded(data: &[u8], len: usize) -> Vec<u8> {
    let mut out = data.to_vec();
    out.resize(len, ERASED_BYTE);
    out
}

fn state(fw_version: u16) -> Option<PersistedState> {
    Some(PersistedState {
        fw_version,
        ..PersistedState::default()
    })
}

/// Generate a secrets file and load it back.
#[test]
fn secrets_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.toml");
    let output = test(["secrets", "-o", path.to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stderr.is_empty());

    let text = std::fs::read_to_string(&path).unwrap();
    for field in [
        "firmware_key",
        "firmware_hash_key",
        "firmware_iv",
        "readback_key",
        "readback_hash_key",
        "readback_iv",
        "readback_password",
    ] {
        assert!(text.contains(field), "{field} missing");
    }
    let loaded = Secrets::load(&path).unwrap();
    assert_eq!(Secrets::parse(&loaded.to_toml().unwrap()).unwrap(), loaded);
}

/// An existing secrets file is never replaced by accident.
#[test]
fn secrets_refuses_to_overwrite() {
    let file = create_file(b"precious");
    let output = test(["secrets", "-o", file.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("--force"));
    assert_eq!(std::fs::read(file.path()).unwrap(), b"precious");

    let output = test(["secrets", "--force", "-o", file.path().to_str().unwrap()]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(Secrets::load(file.path()).is_ok());
}

#[test]
fn secrets_with_reused_key_are_refused() {
    let mut text = secrets(1).to_toml().unwrap();
    let firmware_key = hex::encode(secrets(1).firmware_key);
    let hash_key = hex::encode(secrets(1).firmware_hash_key);
    text = text.replace(&hash_key, &firmware_key);
    let err = Secrets::parse(&text).unwrap_err();
    assert!(err.to_string().contains("must differ"));
}

#[test]
fn secrets_with_short_iv_are_refused() {
    let text = secrets(1).to_toml().unwrap();
    let iv = hex::encode(secrets(1).firmware_iv);
    let err = Secrets::parse(&text.replace(&iv, &iv[..30])).unwrap_err();
    assert!(err.to_string().contains("firmware_iv must be 16 bytes"));
}

/// Protect a firmware file and check every part of the package by hand.
#[test]
fn protect_builds_package() {
    let secrets = secrets(2);
    let secrets_file = create_file(secrets.to_toml().unwrap().as_bytes());
    let firmware = image(10_000, 3);
    let input = create_file(&firmware);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("update.bin");

    let output = test([
        "protect",
        "--secrets",
        secrets_file.path().to_str().unwrap(),
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        path.to_str().unwrap(),
        "--firmware-version",
        "7",
        "--message",
        "hello there",
    ]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("10000 B"));

    let package = std::fs::read(&path).unwrap();
    assert_eq!(package.len(), package::PACKAGE_SIZE);

    // Tag over the ciphertext pages, in front of the last page.
    let (body, mac_page) = package.split_at(ENCRYPTED_BYTES);
    let tag = cbc_mac(&secrets.firmware_hash_key, body, &mut rng()).unwrap();
    assert_eq!(&mac_page[..TAG_SIZE], &tag);

    let mut plain = body.to_vec();
    CfbStream::new(&secrets.firmware_key, &secrets.firmware_iv, Direction::Decrypt, &mut rng())
        .apply(&mut plain, &mut rng())
        .unwrap();
    assert_eq!(version_of(plain[..PAGE_SIZE].try_into().unwrap()), 7);
    let message = &plain[PAGE_SIZE..5 * PAGE_SIZE];
    assert_eq!(&message[..12], b"hello there\0");
    assert!(message[12..].iter().all(|&b| b == ERASED_BYTE));
    assert_eq!(plain[5 * PAGE_SIZE..], padded(&firmware, MAX_IMAGE_SIZE)[..]);
}

#[test]
fn protect_rejects_oversized_image() {
    let secrets_file = create_file(secrets(2).to_toml().unwrap().as_bytes());
    let input = create_file(&image(MAX_IMAGE_SIZE + 1, 4));
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("update.bin");
    let output = test([
        "protect",
        "--secrets",
        secrets_file.path().to_str().unwrap(),
        "-i",
        input.path().to_str().unwrap(),
        "-o",
        path.to_str().unwrap(),
        "--firmware-version",
        "2",
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("at most 30720 fit"));
    assert!(!path.exists());
}

#[test]
fn protect_rejects_bad_message() {
    let secrets_file = create_file(secrets(2).to_toml().unwrap().as_bytes());
    let input = create_file(&image(100, 4));
    let long = "x".repeat(1024);
    for (message, complaint) in [(long.as_str(), "at most 1023 fit"), ("a\0b", "NUL")] {
        let output = test([
            "protect",
            "--secrets",
            secrets_file.path().to_str().unwrap(),
            "-i",
            input.path().to_str().unwrap(),
            "-o",
            "/nonexistent/update.bin",
            "--firmware-version",
            "2",
            "--message",
            message,
        ]);
        assert_eq!(output.exit_code, ExitCode(1));
        assert!(output.stderr.contains(complaint), "{}", output.stderr);
    }
}

/// Full update session against the simulated bootloader.
#[test]
fn update_session_installs_package() {
    let secrets = secrets(5);
    let firmware = image(20_000, 6);
    let package = package::protect(&secrets, 4, b"v4", &firmware, &mut rng()).unwrap();
    let mut device = Device::boot(
        &secrets,
        Mode::Update,
        Setup {
            state: state(3),
            ..Setup::default()
        },
    );

    session::update(&mut device.host, &package).unwrap();

    let mut device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Ok(Completed::Updated { version: 4 })));
    assert_eq!(
        device.pages(0, APPLICATION_PAGES),
        padded(&firmware, MAX_IMAGE_SIZE)
    );
    assert_eq!(
        device.pages(MESSAGE_FIRST_PAGE, MESSAGE_PAGES),
        padded(b"v4\0", MESSAGE_PAGES as usize * PAGE_SIZE)
    );
    assert_eq!(device.store.load().unwrap().fw_version, 4);
}

#[test]
fn update_session_reports_downgrade() {
    let secrets = secrets(5);
    let package = package::protect(&secrets, 2, b"", &image(1000, 6), &mut rng()).unwrap();
    let mut device = Device::boot(
        &secrets,
        Mode::Update,
        Setup {
            state: state(3),
            ..Setup::default()
        },
    );

    let err = session::update(&mut device.host, &package).unwrap_err();
    assert!(matches!(err, session::Error::Rejected), "{err}");

    let mut device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Err(Fault::DowngradeRejected)));
    assert!(device.pages(0, APPLICATION_PAGES).iter().all(|&b| b == ERASED_BYTE));
}

#[test]
fn update_session_with_foreign_package_is_rejected() {
    let package = package::protect(&secrets(8), 9, b"", &image(1000, 6), &mut rng()).unwrap();
    let mut device = Device::boot(&secrets(5), Mode::Update, Setup::default());

    let err = session::update(&mut device.host, &package).unwrap_err();
    assert!(matches!(err, session::Error::Rejected), "{err}");

    let device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Err(Fault::AuthenticationFailure)));
}

#[test]
fn update_refuses_truncated_package_before_sending() {
    let mut device = Device::boot(&secrets(5), Mode::Update, Setup::default());
    let err = session::update(&mut device.host, &[0u8; 1000]).unwrap_err();
    assert!(matches!(err, session::Error::PackageSize(1000)));
    // The device never got a page and gives up once the host hangs up.
    let device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Err(Fault::LinkStalled)));
}

#[test]
fn session_checks_announced_mode() {
    let secrets = secrets(5);
    let package = package::protect(&secrets, 2, b"", &[], &mut rng()).unwrap();
    let mut device = Device::boot(&secrets, Mode::Readback, Setup::default());
    let err = session::update(&mut device.host, &package).unwrap_err();
    assert!(
        matches!(err, session::Error::WrongMode { expected: Mode::Update, byte: b'R' }),
        "{err}"
    );
    device.finish();
}

/// Read back application pages and decrypt them on the host.
#[test]
fn readback_session_returns_flash() {
    let secrets = secrets(9);
    let firmware = image(4 * PAGE_SIZE, 10);
    let mut device = Device::boot(
        &secrets,
        Mode::Readback,
        Setup {
            contents: vec![(0, firmware.clone())],
            ..Setup::default()
        },
    );

    // Bytes 0x180..0x280 span pages 1 and 2.
    let request = readback::request(&secrets, 0x180, 0x100, &mut rng()).unwrap();
    let size = readback::response_size(0x180, 0x100);
    assert_eq!(size, 2 * PAGE_SIZE);
    let mut data = session::readback(&mut device.host, &request, size).unwrap();
    readback::decrypt(&secrets, &mut data, &mut rng()).unwrap();
    assert_eq!(data, firmware[PAGE_SIZE..3 * PAGE_SIZE]);

    let device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Ok(Completed::ReadBack { pages: 2 })));
}

/// A request aimed at the bootloader gets the last message page instead.
#[test]
fn readback_session_never_leaks_bootloader() {
    let secrets = secrets(9);
    let message = b"release notes".to_vec();
    let mut device = Device::boot(
        &secrets,
        Mode::Readback,
        Setup {
            contents: vec![
                (MESSAGE_FIRST_PAGE + MESSAGE_PAGES - 1, message.clone()),
                (BOOTLOADER_FIRST_PAGE, image(PAGE_SIZE, 11)),
            ],
            ..Setup::default()
        },
    );

    let start = u32::from(BOOTLOADER_FIRST_PAGE) * PAGE_SIZE as u32;
    let request = readback::request(&secrets, start, 4096, &mut rng()).unwrap();
    let size = readback::response_size(start, 4096);
    assert_eq!(size, PAGE_SIZE);
    let mut data = session::readback(&mut device.host, &request, size).unwrap();
    readback::decrypt(&secrets, &mut data, &mut rng()).unwrap();
    assert_eq!(data, padded(&message, PAGE_SIZE));
    device.finish();
}

#[test]
fn readback_session_with_wrong_password_is_rejected() {
    let secrets = secrets(9);
    let mut impostor = secrets.clone();
    impostor.readback_password = *b"not the password at all!";
    let mut device = Device::boot(&secrets, Mode::Readback, Setup::default());

    let request = readback::request(&impostor, 0, 256, &mut rng()).unwrap();
    let err = session::readback(&mut device.host, &request, PAGE_SIZE).unwrap_err();
    assert!(matches!(err, session::Error::Rejected), "{err}");

    let device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Err(Fault::AuthorizationFailure)));
}

/// Fingerprint matches the flashed bootloader: the device gets sealed.
#[test]
fn configure_session_seals_matching_device() {
    let secrets = secrets(12);
    let bootloader = image(5000, 13);
    let expected = package::fingerprint(&secrets, &bootloader, &mut rng()).unwrap();
    let mut device = Device::boot(
        &secrets,
        Mode::Configure,
        Setup {
            contents: vec![(BOOTLOADER_FIRST_PAGE, bootloader)],
            ..Setup::default()
        },
    );

    let fingerprint = session::configure(&mut device.host, &expected).unwrap();
    assert_eq!(fingerprint.reported, expected);
    assert!(fingerprint.sealed);

    let mut device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Ok(Completed::Configured { sealed: true })));
    assert!(device.store.load().unwrap().configured);
}

#[test]
fn configure_session_leaves_mismatch_unsealed() {
    let secrets = secrets(12);
    let expected = package::fingerprint(&secrets, &image(5000, 14), &mut rng()).unwrap();
    let mut device = Device::boot(
        &secrets,
        Mode::Configure,
        Setup {
            contents: vec![(BOOTLOADER_FIRST_PAGE, image(5000, 13))],
            ..Setup::default()
        },
    );

    let fingerprint = session::configure(&mut device.host, &expected).unwrap();
    assert_ne!(fingerprint.reported, expected);
    assert!(!fingerprint.sealed);

    let mut device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Ok(Completed::Configured { sealed: false })));
    assert!(!device.store.load().unwrap().configured);
}

#[test]
fn configure_session_on_sealed_device_is_rejected() {
    let secrets = secrets(12);
    let expected = package::fingerprint(&secrets, &[], &mut rng()).unwrap();
    let mut device = Device::boot(
        &secrets,
        Mode::Configure,
        Setup {
            state: Some(PersistedState {
                configured: true,
                ..PersistedState::default()
            }),
            ..Setup::default()
        },
    );

    let err = session::configure(&mut device.host, &expected).unwrap_err();
    assert!(matches!(err, session::Error::Rejected), "{err}");
    let device = device.finish();
    assert_eq!(device.terminal, Terminal::AwaitReset(Err(Fault::AlreadySealed)));
}

#[test]
fn fingerprint_covers_erased_tail() {
    let secrets = secrets(12);
    let short = image(100, 15);
    let explicit = padded(&short, BOOTLOADER_PAGES as usize * PAGE_SIZE);
    assert_eq!(
        package::fingerprint(&secrets, &short, &mut rng()).unwrap(),
        package::fingerprint(&secrets, &explicit, &mut rng()).unwrap()
    );
    assert!(package::fingerprint(&secrets, &vec![0; package::BOOTLOADER_SIZE + 1], &mut rng()).is_err());
}

fn test<const N: usize>(args: [&str; N]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(std::iter::once("host-tools").chain(args), &mut stdout, &mut stderr);
    println!("* args: {:?}", args);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}

fn create_file(data: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(data).unwrap();
    file
}
