//! Packs data uniform values into the device byte layout.

use super::layout::UniformLayout;
use super::values::UniformValue;
use crate::errors::{CacheError, Result};

/// Serialises `lookup`'s values for `layout` into `out`.
///
/// `out` is resized to [`UniformLayout::data_size`]. Unset values are left
/// zeroed; a value whose type differs from the layout is rejected.
pub fn pack_uniforms<'a>(
    layout: &UniformLayout,
    lookup: impl Fn(&str) -> Option<&'a UniformValue>,
    out: &mut Vec<u8>,
) -> Result<()> {
    out.clear();
    out.resize(layout.data_size() as usize, 0);

    for (field, offset) in layout.data().iter().zip(layout.offsets()) {
        let Some(value) = lookup(&field.name) else {
            continue;
        };
        if value.ty() != field.ty {
            return Err(CacheError::incompatible(format!(
                "uniform '{}' declared as {:?} but supplied as {:?}",
                field.name,
                field.ty,
                value.ty()
            )));
        }

        let offset = offset as usize;
        match value {
            UniformValue::Float(v) => write(out, offset, bytemuck::bytes_of(v)),
            UniformValue::Int(v) => write(out, offset, bytemuck::bytes_of(v)),
            UniformValue::UInt(v) => write(out, offset, bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => write(out, offset, bytemuck::bytes_of(v)),
            UniformValue::Vec3(v) => write(out, offset, bytemuck::bytes_of(v)),
            UniformValue::Vec4(v) => write(out, offset, bytemuck::bytes_of(v)),
            UniformValue::Mat3(m) => {
                // Each column padded to 16 bytes.
                for (i, column) in m.to_cols_array_2d().iter().enumerate() {
                    write(out, offset + i * 16, bytemuck::cast_slice(column.as_slice()));
                }
            }
            UniformValue::Mat4(m) => write(out, offset, bytemuck::bytes_of(m)),
        }
    }
    Ok(())
}

#[inline]
fn write(out: &mut [u8], offset: usize, bytes: &[u8]) {
    out[offset..offset + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use glam::{Mat3, Vec3};
    use rustc_hash::FxHashMap;

    use super::*;
    use crate::uniforms::layout::{UniformScope, UniformType};

    const VF: wgpu::ShaderStages = wgpu::ShaderStages::VERTEX_FRAGMENT;

    fn pack(layout: &UniformLayout, values: &FxHashMap<&str, UniformValue>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        pack_uniforms(layout, |name| values.get(name), &mut out)?;
        Ok(out)
    }

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn packs_at_wgsl_offsets() {
        let layout = UniformLayout::new(UniformScope::Instance)
            .with_data("color", UniformType::Vec3, VF)
            .with_data("opacity", UniformType::Float, VF);
        let values = FxHashMap::from_iter([
            ("color", UniformValue::Vec3(Vec3::new(1.0, 2.0, 3.0))),
            ("opacity", UniformValue::Float(0.5)),
        ]);

        let bytes = pack(&layout, &values).unwrap();
        assert_eq!(floats(&bytes), vec![1.0, 2.0, 3.0, 0.5]);
    }

    #[test]
    fn mat3_columns_are_padded() {
        let layout = UniformLayout::new(UniformScope::Instance).with_data("normal", UniformType::Mat3, VF);
        let values = FxHashMap::from_iter([("normal", UniformValue::Mat3(Mat3::IDENTITY))]);

        let bytes = pack(&layout, &values).unwrap();
        let floats = floats(&bytes);
        assert_eq!(floats.len(), 12);
        assert_eq!(&floats[0..4], &[1.0_f32, 0.0, 0.0, 0.0]);
        assert_eq!(&floats[4..8], &[0.0_f32, 1.0, 0.0, 0.0]);
        assert_eq!(&floats[8..12], &[0.0_f32, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn unset_values_stay_zeroed() {
        let layout = UniformLayout::new(UniformScope::Global).with_data("time", UniformType::Float, VF);
        let bytes = pack(&layout, &FxHashMap::default()).unwrap();
        assert_eq!(bytes, vec![0; 16]);
    }

    #[test]
    fn type_mismatch_is_incompatible() {
        let layout = UniformLayout::new(UniformScope::Global).with_data("time", UniformType::Float, VF);
        let values = FxHashMap::from_iter([("time", UniformValue::UInt(3))]);
        assert!(matches!(
            pack(&layout, &values),
            Err(CacheError::IncompatibleDescription(_))
        ));
    }
}
