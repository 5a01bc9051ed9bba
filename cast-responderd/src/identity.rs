use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use sha1::{Digest, Sha1};
use crate::config::IdentityConfig;
use crate::platform::device::DeviceInfo;

/// RFC 4122 DNS namespace, 6ba7b810-9dad-11d1-80b4-00c04fd430c8
const NAMESPACE_DNS: [u8; 16] = [
    0x6b, 0xa7, 0xb8, 0x10, 0x9d, 0xad, 0x11, 0xd1,
    0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30, 0xc8,
];

/// Name-based (version 5) UUID of `serial_number` in the DNS namespace,
/// formatted as lowercase 8-4-4-4-12 hex. Empty input yields an empty string.
pub fn generate_uuid_v5(serial_number: &str) -> String {
    if serial_number.is_empty() {
        tracing::error!("Serial number is empty, cannot generate UUID");
        return String::new();
    }

    let mut hasher = Sha1::new();
    hasher.update(NAMESPACE_DNS);
    hasher.update(serial_number.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    format!(
        "{}-{}-{}-{}-{}",
        hex::encode(&bytes[0..4]),
        hex::encode(&bytes[4..6]),
        hex::encode(&bytes[6..8]),
        hex::encode(&bytes[8..10]),
        hex::encode(&bytes[10..16]),
    )
}

/// Extract the `deviceId` value from a device identity file. The first line
/// mentioning `deviceId` decides; its value is stripped of whitespace, braces,
/// commas, slashes and quotes, then lowercased.
pub fn parse_device_id(contents: &str) -> Option<String> {
    let line = contents.lines().find(|line| line.contains("deviceId"))?;
    let rest = &line[line.find("deviceId")?..];
    let value = &rest[rest.find(':')? + 1..];

    let normalized: String = value
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '{' | '}' | ',' | '/' | '"'))
        .collect::<String>()
        .to_lowercase();

    (!normalized.is_empty()).then_some(normalized)
}

fn read_device_id(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    parse_device_id(&contents)
}

fn read_first_line(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    let line = contents.lines().next()?.trim();
    (!line.is_empty()).then(|| line.to_string())
}

/// Produces the receiver identifier advertised by the discovery service.
/// Once a non-empty identifier has been resolved it is kept for the lifetime
/// of the resolver.
pub struct IdentityResolver {
    device_id_file: PathBuf,
    fallback_files: Vec<PathBuf>,
    cached: OnceLock<String>,
}

impl IdentityResolver {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            device_id_file: config.device_id_file.clone(),
            fallback_files: config.fallback_files.clone(),
            cached: OnceLock::new(),
        }
    }

    /// Empty result means "no identity": callers omit it rather than fail.
    pub fn resolve(&self, device: &dyn DeviceInfo) -> String {
        if let Some(id) = self.cached.get() {
            return id.clone();
        }

        let id = self.lookup(device);
        if id.is_empty() {
            return id;
        }
        if self.cached.set(id.clone()).is_ok() {
            tracing::info!("Receiver identity resolved: {}", id);
        }
        self.cached.get().cloned().unwrap_or(id)
    }

    fn lookup(&self, device: &dyn DeviceInfo) -> String {
        if let Some(id) = read_device_id(&self.device_id_file) {
            return id;
        }

        if let Some(id) = self.fallback_files.iter().find_map(|p| read_first_line(p)) {
            return id;
        }

        tracing::info!("No receiver identity file found, deriving UUID from serial number");
        match device.serial_number() {
            Ok(serial) => generate_uuid_v5(&serial),
            Err(e) => {
                tracing::error!("Failed to retrieve serial number: {}", e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use anyhow::bail;

    struct FakeDevice {
        serials: Mutex<Vec<anyhow::Result<String>>>,
        calls: AtomicUsize,
    }

    impl FakeDevice {
        fn new(serials: Vec<anyhow::Result<String>>) -> Self {
            Self { serials: Mutex::new(serials), calls: AtomicUsize::new(0) }
        }
    }

    impl DeviceInfo for FakeDevice {
        fn serial_number(&self) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut serials = self.serials.lock().unwrap();
            if serials.is_empty() {
                bail!("no more serials");
            }
            serials.remove(0)
        }
    }

    fn is_v5_uuid(s: &str) -> bool {
        let groups: Vec<&str> = s.split('-').collect();
        let lens: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        lens == [8, 4, 4, 4, 12]
            && s.chars().all(|c| c == '-' || matches!(c, '0'..='9' | 'a'..='f'))
            && groups[2].starts_with('5')
            && matches!(groups[3].chars().next(), Some('8' | '9' | 'a' | 'b'))
    }

    fn resolver_in(dir: &Path) -> IdentityResolver {
        IdentityResolver::new(&IdentityConfig {
            device_id_file: dir.join("gpid.txt"),
            fallback_files: vec![dir.join("deviceid.dat"), dir.join("wbdevice.dat")],
            serial_number_files: vec![],
        })
    }

    #[test]
    fn test_uuid_matches_reference_vector() {
        // uuid5(NAMESPACE_DNS, "python.org")
        assert_eq!(generate_uuid_v5("python.org"), "886313e1-3b8a-5372-9b90-0c9aee199e5d");
    }

    #[test]
    fn test_uuid_is_deterministic_and_well_formed() {
        let first = generate_uuid_v5("SN-0042");
        assert_eq!(first, generate_uuid_v5("SN-0042"));
        assert!(is_v5_uuid(&first), "{} is not a v5 UUID", first);
    }

    #[test]
    fn test_distinct_serials_do_not_collide() {
        let uuids: HashSet<String> = (0..500)
            .map(|i| generate_uuid_v5(&format!("SERIAL{:06}", i)))
            .collect();

        assert_eq!(uuids.len(), 500);
        assert!(uuids.iter().all(|u| is_v5_uuid(u)));
    }

    #[test]
    fn test_empty_serial_yields_empty_uuid() {
        assert_eq!(generate_uuid_v5(""), "");
    }

    #[test]
    fn test_parse_device_id_normalizes_value() {
        let contents = "{\n  \"partnerId\": \"x\",\n  \"deviceId\": \"ABC/Def-12{}\",\n}\n";
        assert_eq!(parse_device_id(contents).as_deref(), Some("abcdef-12"));
    }

    #[test]
    fn test_parse_device_id_missing_or_empty() {
        assert_eq!(parse_device_id("partnerId: x\n"), None);
        assert_eq!(parse_device_id("deviceId: \"\",\n"), None);
        assert_eq!(parse_device_id("deviceId without colon\ndeviceId: later\n"), None);
    }

    #[test]
    fn test_device_id_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gpid.txt"), "\"deviceId\": \"P-1\"\n").unwrap();
        std::fs::write(dir.path().join("deviceid.dat"), "fallback\n").unwrap();
        let device = FakeDevice::new(vec![Ok("SN".to_string())]);

        assert_eq!(resolver_in(dir.path()).resolve(&device), "p-1");
        assert_eq!(device.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_second_fallback_file_used_when_first_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("wbdevice.dat"), "wb-device-7\nignored\n").unwrap();
        let device = FakeDevice::new(vec![]);

        assert_eq!(resolver_in(dir.path()).resolve(&device), "wb-device-7");
    }

    #[test]
    fn test_serial_uuid_is_cached_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let device = FakeDevice::new(vec![Ok("SN-1".to_string()), Ok("SN-2".to_string())]);
        let resolver = resolver_in(dir.path());

        let first = resolver.resolve(&device);
        let second = resolver.resolve(&device);

        assert_eq!(first, generate_uuid_v5("SN-1"));
        assert_eq!(first, second);
        assert_eq!(device.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_resolution_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let device = FakeDevice::new(vec![
            Err(anyhow::anyhow!("device registry down")),
            Ok(String::new()),
            Ok("SN-9".to_string()),
        ]);
        let resolver = resolver_in(dir.path());

        assert_eq!(resolver.resolve(&device), "");
        assert_eq!(resolver.resolve(&device), "");
        assert_eq!(resolver.resolve(&device), generate_uuid_v5("SN-9"));
        assert_eq!(device.calls.load(Ordering::SeqCst), 3);
    }
}
