// Shader module loading
//
// Precompiled SPIR-V binaries are read by name at startup. ash::util::read_spv
// turns the bytes into 4-byte words (fixing alignment and endianness).

use anyhow::Result;
use ash::vk;
use std::io::{self, Cursor};
use std::path::Path;

use super::VulkanDevice;
use crate::error::{ShaderError, VkResultExt};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into words.
pub fn decode_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    let invalid = |source: io::Error| ShaderError::InvalidSpirv {
        path: path.display().to_string(),
        source,
    };

    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(invalid)?;
    if words.first() != Some(&SPIRV_MAGIC) {
        return Err(invalid(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing SPIR-V magic number",
        )));
    }
    Ok(words)
}

pub fn read_spirv_file(path: &Path) -> Result<Vec<u32>, ShaderError> {
    let bytes = std::fs::read(path).map_err(|source| ShaderError::Read {
        path: path.display().to_string(),
        source,
    })?;
    decode_spirv(path, &bytes)
}

/// Load a SPIR-V file and create a shader module from it
pub fn load_shader_module(device: &VulkanDevice, path: &Path) -> Result<vk::ShaderModule> {
    let code = read_spirv_file(path)?;
    log::debug!("Loaded shader {:?} ({} words)", path, code.len());

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .vk_op("vkCreateShaderModule")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u8> {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        bytes
    }

    #[test]
    fn decodes_little_endian_words() {
        let words = decode_spirv(Path::new("cube.vert.spv"), &header()).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn decodes_big_endian_words() {
        let mut bytes = SPIRV_MAGIC.to_be_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_be_bytes());

        let words = decode_spirv(Path::new("cube.vert.spv"), &bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn rejects_truncated_binary() {
        let mut bytes = header();
        bytes.push(0);

        let err = decode_spirv(Path::new("cube.frag.spv"), &bytes).unwrap_err();
        assert!(matches!(err, ShaderError::InvalidSpirv { .. }));
        assert!(err.to_string().contains("cube.frag.spv"));
    }

    #[test]
    fn rejects_wrong_magic_and_empty_input() {
        let bytes = 0xdead_beefu32.to_le_bytes();
        assert!(decode_spirv(Path::new("x.spv"), &bytes).is_err());
        assert!(decode_spirv(Path::new("x.spv"), &[]).is_err());
    }

    #[test]
    fn reads_binary_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cube.vert.spv");
        std::fs::write(&path, header()).unwrap();

        assert_eq!(read_spirv_file(&path).unwrap().len(), 2);
    }

    #[test]
    fn missing_file_reports_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_spirv_file(&dir.path().join("cube.vert.spv")).unwrap_err();
        assert!(matches!(err, ShaderError::Read { .. }));
    }
}
