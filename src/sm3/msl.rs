// Copyright 2024 The Dx9mt Developers.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Metal Shading Language emitter.
//!
//! Entry points are named `vs_<hash>` / `ps_<hash>` from the bytecode
//! hash, so identical bytecode always lands on the same compiled function.
//! Uniform float constants bind as `constant float4*` at buffer 1 for
//! vertex functions and buffer 0 for fragment functions; textures and
//! samplers bind at the sampler dcl's register index. The vertex input
//! struct uses a fixed semantic-to-attribute mapping the backend's vertex
//! descriptors agree on.

use std::fmt;
use std::fmt::Write;

use super::{cmp, op, reg, rmod, srcmod, usage, DefValue, Instruction, Program, Register,
            ShaderType};

/// Output source budget.
pub const MAX_SOURCE: usize = 32 * 1024;

/// Why emission failed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EmitError {
    /// The program targets the other pipeline stage.
    WrongStage,
    /// The generated source exceeded [`MAX_SOURCE`].
    SourceOverflow,
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            EmitError::WrongStage => write!(f, "program targets the other shader stage"),
            EmitError::SourceOverflow => write!(f, "MSL source buffer overflow"),
        }
    }
}

impl std::error::Error for EmitError {}

/// A generated Metal function.
#[derive(Clone, Debug)]
pub struct MslShader {
    pub entry_name: String,
    pub source: String,
}

const COMPONENTS: [char; 4] = ['x', 'y', 'z', 'w'];

fn reg_name(register: &Register, is_vs: bool, major: u8) -> String {
    match register.reg_type {
        reg::TEMP => format!("r{}", register.number),
        reg::INPUT => format!("in.v{}", register.number),
        reg::CONST => format!("c[{}]", register.number),
        // VS: the address register. PS < 3.0: texcoord inputs.
        reg::ADDR => {
            if is_vs {
                format!("a{}", register.number)
            } else {
                format!("in.t{}", register.number)
            }
        }
        reg::RASTOUT => match register.number {
            0 => String::from("out.position"),
            1 => String::from("out.fog"),
            _ => String::from("out.pointsize"),
        },
        reg::ATTROUT => format!("out.oD{}", register.number),
        // VS < 3.0 writes texcoord outputs through this type; 3.0 uses
        // generic o# registers.
        reg::OUTPUT => {
            if is_vs && major < 3 {
                format!("out.oT{}", register.number)
            } else {
                format!("out.o{}", register.number)
            }
        }
        reg::COLOROUT => format!("oC{}", register.number),
        reg::DEPTHOUT => String::from("oDepth"),
        reg::SAMPLER => format!("s{}", register.number),
        reg::CONSTINT => format!("i{}", register.number),
        reg::CONSTBOOL => format!("b{}", register.number),
        reg::MISCTYPE => {
            if register.number == 0 {
                String::from("in.vpos")
            } else {
                String::from("in.vface")
            }
        }
        other => format!("UNKNOWN{}_{}", other, register.number),
    }
}

fn swizzle_str(register: &Register) -> String {
    if register.is_identity_swizzle() {
        return String::new();
    }
    if register.is_replicate_swizzle() {
        return format!(".{}", COMPONENTS[register.swizzle[0] as usize]);
    }
    format!(
        ".{}{}{}{}",
        COMPONENTS[register.swizzle[0] as usize],
        COMPONENTS[register.swizzle[1] as usize],
        COMPONENTS[register.swizzle[2] as usize],
        COMPONENTS[register.swizzle[3] as usize]
    )
}

fn wmask_str(mask: u8) -> String {
    if mask == 0xF {
        return String::new();
    }
    let mut out = String::from(".");
    for component in 0..4 {
        if mask & (1 << component) != 0 {
            out.push(COMPONENTS[component]);
        }
    }
    out
}

fn mask_count(mask: u8) -> u32 {
    (mask & 0xF).count_ones()
}

/// Render a source operand: register, swizzle, then the modifier wrapper.
fn src_expr(register: &Register, is_vs: bool, major: u8) -> String {
    let base = reg_name(register, is_vs, major);
    let swizzle = swizzle_str(register);

    match register.src_modifier {
        srcmod::NEGATE => format!("(-{}{})", base, swizzle),
        srcmod::ABS => format!("abs({}{})", base, swizzle),
        srcmod::ABS_NEG => format!("(-abs({}{}))", base, swizzle),
        srcmod::COMPLEMENT => format!("(1.0 - {}{})", base, swizzle),
        srcmod::X2 => format!("({}{} * 2.0)", base, swizzle),
        srcmod::X2_NEG => format!("(-{}{} * 2.0)", base, swizzle),
        srcmod::BIAS => format!("({}{} - 0.5)", base, swizzle),
        srcmod::BIAS_NEG => format!("(-({}{} - 0.5))", base, swizzle),
        _ => format!("{}{}", base, swizzle),
    }
}

fn comparison_op(code: u8) -> &'static str {
    match code {
        cmp::GT => ">",
        cmp::EQ => "==",
        cmp::GE => ">=",
        cmp::LT => "<",
        cmp::NE => "!=",
        cmp::LE => "<=",
        _ => "!=",
    }
}

/// Emit a matrix-multiply block: N dot products against consecutive
/// constant registers starting at the second source's register number.
fn emit_matrix_block(out: &mut String, label: &str, vec_expr: &str, vec_ty: &str,
                     rhs: &str, dst: &str, wm: &str, saturate: bool) {
    out.push_str(&format!("  {{ // {}\n", label));
    out.push_str(&format!("    {} _mv = {};\n", vec_ty, vec_expr));
    if saturate {
        out.push_str(&format!("    {}{} = saturate({});\n", dst, wm, rhs));
    } else {
        out.push_str(&format!("    {}{} = {};\n", dst, wm, rhs));
    }
    out.push_str("  }\n");
}

fn emit_instruction(out: &mut String, instruction: &Instruction, is_vs: bool, major: u8) {
    if instruction.opcode == op::NOP {
        return;
    }

    let dst = reg_name(&instruction.dst, is_vs, major);
    let wm = wmask_str(instruction.dst.write_mask);
    let saturate = instruction.dst.result_modifier & rmod::SATURATE != 0;

    let mut operands: Vec<String> = Vec::new();
    for index in 0..instruction.num_sources.min(3) as usize {
        operands.push(src_expr(&instruction.sources[index], is_vs, major));
    }
    let s0 = operands.get(0).cloned().unwrap_or_default();
    let s1 = operands.get(1).cloned().unwrap_or_default();
    let s2 = operands.get(2).cloned().unwrap_or_default();

    let mut rhs_is_scalar = false;
    let rhs = match instruction.opcode {
        op::MOV => s0.clone(),
        op::ADD => format!("{} + {}", s0, s1),
        op::SUB => format!("{} - {}", s0, s1),
        op::MUL => format!("{} * {}", s0, s1),
        op::MAD => format!("{} * {} + {}", s0, s1, s2),
        op::DP3 => {
            rhs_is_scalar = true;
            format!("dot({}.xyz, {}.xyz)", s0, s1)
        }
        op::DP4 => {
            rhs_is_scalar = true;
            format!("dot({}, {})", s0, s1)
        }
        op::RCP => {
            rhs_is_scalar = true;
            format!("(1.0 / {}.x)", s0)
        }
        op::RSQ => {
            rhs_is_scalar = true;
            format!("rsqrt(abs({}.x))", s0)
        }
        op::MIN => format!("min({}, {})", s0, s1),
        op::MAX => format!("max({}, {})", s0, s1),
        op::SLT => format!("select(float4(0.0), float4(1.0), ({} < {}))", s0, s1),
        op::SGE => format!("select(float4(0.0), float4(1.0), ({} >= {}))", s0, s1),
        op::EXP => {
            rhs_is_scalar = true;
            format!("exp2({}.x)", s0)
        }
        op::LOG => {
            rhs_is_scalar = true;
            format!("log2(abs({}.x))", s0)
        }
        op::FRC => format!("fract({})", s0),
        op::ABS => format!("abs({})", s0),
        op::NRM => format!(
            "float4(normalize({}.xyz), rsqrt(dot({}.xyz, {}.xyz)))",
            s0, s0, s0
        ),
        // lrp d, f, a, b computes f*(a-b)+b, which is mix(b, a, f).
        op::LRP => format!("mix({}, {}, {})", s2, s1, s0),
        // cmp d, s0, s1, s2: per-component (s0 >= 0) ? s1 : s2.
        op::CMP => format!("select({}, {}, {} >= float4(0.0))", s2, s1, s0),
        op::POW => {
            rhs_is_scalar = true;
            format!("pow(abs({}.x), {}.x)", s0, s1)
        }
        op::CRS => format!("float4(cross({}.xyz, {}.xyz), 0.0)", s0, s1),
        op::SINCOS => format!("float4(cos({}.x), sin({}.x), 0.0, 0.0)", s0, s0),
        op::DST => format!("float4(1.0, {}.y * {}.y, {}.z, {}.w)", s0, s1, s0, s1),
        op::DP2ADD => {
            rhs_is_scalar = true;
            format!("(dot({}.xy, {}.xy) + {}.x)", s0, s1, s2)
        }
        op::MOVA => format!("float4(floor({} + float4(0.5)))", s0),

        op::LIT => {
            out.push_str("  { // lit\n");
            out.push_str(&format!("    float4 _ls = {};\n", s0));
            out.push_str("    float _d = max(_ls.x, 0.0);\n");
            out.push_str(
                "    float _s = (_ls.x > 0.0) ? pow(max(_ls.y, 0.0), \
                 clamp(_ls.w, -128.0, 128.0)) : 0.0;\n",
            );
            let lit_rhs = "float4(1.0, _d, _s, 1.0)";
            if saturate {
                out.push_str(&format!("    {}{} = saturate({});\n", dst, wm, lit_rhs));
            } else {
                out.push_str(&format!("    {}{} = {};\n", dst, wm, lit_rhs));
            }
            out.push_str("  }\n");
            return;
        }

        op::M4X4 => {
            let base = instruction.sources[1].number;
            let rhs = format!(
                "float4(dot(_mv, c[{}]), dot(_mv, c[{}]), dot(_mv, c[{}]), dot(_mv, c[{}]))",
                base,
                base + 1,
                base + 2,
                base + 3
            );
            emit_matrix_block(out, "m4x4", &s0, "float4", &rhs, &dst, &wm, saturate);
            return;
        }
        op::M4X3 => {
            let base = instruction.sources[1].number;
            let rhs = format!(
                "float4(dot(_mv, c[{}]), dot(_mv, c[{}]), dot(_mv, c[{}]), 1.0)",
                base,
                base + 1,
                base + 2
            );
            emit_matrix_block(out, "m4x3", &s0, "float4", &rhs, &dst, &wm, saturate);
            return;
        }
        op::M3X4 => {
            let base = instruction.sources[1].number;
            let vec = format!("{}.xyz", s0);
            let rhs = format!(
                "float4(dot(_mv, c[{}].xyz), dot(_mv, c[{}].xyz), dot(_mv, c[{}].xyz), \
                 dot(_mv, c[{}].xyz))",
                base,
                base + 1,
                base + 2,
                base + 3
            );
            emit_matrix_block(out, "m3x4", &vec, "float3", &rhs, &dst, &wm, saturate);
            return;
        }
        op::M3X3 => {
            let base = instruction.sources[1].number;
            let vec = format!("{}.xyz", s0);
            let rhs = format!(
                "float4(dot(_mv, c[{}].xyz), dot(_mv, c[{}].xyz), dot(_mv, c[{}].xyz), 1.0)",
                base,
                base + 1,
                base + 2
            );
            emit_matrix_block(out, "m3x3", &vec, "float3", &rhs, &dst, &wm, saturate);
            return;
        }
        op::M3X2 => {
            let base = instruction.sources[1].number;
            let vec = format!("{}.xyz", s0);
            let rhs = format!(
                "float4(dot(_mv, c[{}].xyz), dot(_mv, c[{}].xyz), 0.0, 1.0)",
                base,
                base + 1
            );
            emit_matrix_block(out, "m3x2", &vec, "float3", &rhs, &dst, &wm, saturate);
            return;
        }

        op::TEXLD => {
            let sampler = instruction.sources[1].number;
            format!("tex{}.sample(samp{}, {}.xy)", sampler, sampler, s0)
        }
        op::TEXLDL => {
            let sampler = instruction.sources[1].number;
            format!(
                "tex{}.sample(samp{}, {}.xy, level({}.w))",
                sampler, sampler, s0, s0
            )
        }
        op::TEXKILL => {
            out.push_str(&format!(
                "  if (any({}.xyz < float3(0.0))) discard_fragment();\n",
                dst
            ));
            return;
        }

        op::IFC => {
            out.push_str(&format!(
                "  if ({}.x {} {}.x) {{\n",
                s0,
                comparison_op(instruction.comparison),
                s1
            ));
            return;
        }
        op::IF => {
            out.push_str(&format!("  if ({}.x != 0.0) {{\n", s0));
            return;
        }
        op::ELSE => {
            out.push_str("  } else {\n");
            return;
        }
        op::ENDIF => {
            out.push_str("  }\n");
            return;
        }
        op::REP => {
            out.push_str(&format!(
                "  for (int rep_i = 0; rep_i < int({}.x); rep_i++) {{\n",
                s0
            ));
            return;
        }
        op::ENDREP => {
            out.push_str("  }\n");
            return;
        }
        op::BREAK => {
            out.push_str("  break;\n");
            return;
        }
        op::BREAKC => {
            out.push_str(&format!(
                "  if ({}.x {} {}.x) break;\n",
                s0,
                comparison_op(instruction.comparison),
                s1
            ));
            return;
        }

        other => {
            out.push_str(&format!("  // unsupported opcode {}\n", other));
            return;
        }
    };

    // Width-adjust the right-hand side against the destination mask:
    // scalar expressions broaden to floatN, vector expressions narrow via
    // a component suffix when every source is replicate-swizzled.
    let write_count = mask_count(instruction.dst.write_mask);
    let mut final_rhs = rhs;
    if rhs_is_scalar {
        final_rhs = match write_count {
            1 => final_rhs,
            2 => format!("float2({})", final_rhs),
            3 => format!("float3({})", final_rhs),
            _ => format!("float4({})", final_rhs),
        };
    } else if instruction.dst.write_mask != 0xF {
        let mut rhs_width = 4;
        if instruction.num_sources >= 1 {
            let all_replicate = (0..instruction.num_sources.min(3) as usize)
                .all(|index| instruction.sources[index].is_replicate_swizzle());
            if all_replicate {
                rhs_width = 1;
            }
        }
        if write_count < rhs_width {
            let suffix = match write_count {
                1 => ".x",
                2 => ".xy",
                3 => ".xyz",
                _ => "",
            };
            final_rhs = format!("({}){}", final_rhs, suffix);
        }
    }

    if saturate {
        out.push_str(&format!("  {}{} = saturate({});\n", dst, wm, final_rhs));
    } else {
        out.push_str(&format!("  {}{} = {};\n", dst, wm, final_rhs));
    }
}

/// The fixed semantic-to-attribute-index mapping shared with the backend's
/// vertex descriptors. Unmapped semantics are omitted from the input
/// struct.
fn usage_to_attr_index(usage_value: u8, usage_index: u8) -> Option<u32> {
    match (usage_value, usage_index) {
        (usage::POSITION, 0) | (usage::POSITIONT, 0) => Some(0),
        (usage::COLOR, 0) => Some(1),
        (usage::TEXCOORD, 0) => Some(2),
        (usage::NORMAL, 0) => Some(3),
        (usage::TEXCOORD, 1) => Some(4),
        (usage::COLOR, 1) => Some(5),
        (usage::BLENDWEIGHT, 0) => Some(6),
        (usage::BLENDINDICES, 0) => Some(7),
        _ => None,
    }
}

fn float_type_for_mask(mask: u8) -> &'static str {
    match mask_count(mask) {
        1 => "float",
        2 => "float2",
        3 => "float3",
        _ => "float4",
    }
}

fn user_semantic(usage_value: u8) -> &'static str {
    match usage_value {
        usage::TEXCOORD => "texcoord",
        usage::COLOR => "color",
        usage::NORMAL => "normal",
        usage::FOG => "fog",
        _ => "attr",
    }
}

fn emit_local_defs(out: &mut String, program: &Program) {
    for def in program.defs.iter() {
        match def.value {
            DefValue::Float(_) => {
                // Float defs travel in the uploaded constant buffer.
                let _ = writeln!(out, "  // def c{} provided via constant buffer", def.reg_number);
            }
            DefValue::Int(values) => {
                let _ = writeln!(
                    out,
                    "  float4 i{} = float4({}.0, {}.0, {}.0, {}.0);",
                    def.reg_number, values[0], values[1], values[2], values[3]
                );
            }
            DefValue::Bool(value) => {
                let _ = writeln!(
                    out,
                    "  float4 b{} = float4({}, 0.0, 0.0, 0.0);",
                    def.reg_number,
                    if value { "1.0" } else { "0.0" }
                );
            }
        }
    }
}

fn emit_temporaries(out: &mut String, program: &Program) {
    for index in 0..=program.max_temp_reg {
        let _ = writeln!(out, "  float4 r{} = float4(0.0);", index);
    }
}

fn uses_address_register(program: &Program) -> bool {
    program.instructions.iter().any(|instruction| {
        instruction.dst.reg_type == reg::ADDR || instruction.opcode == op::MOVA
    })
}

fn finish(out: String, entry_name: String) -> Result<MslShader, EmitError> {
    if out.len() > MAX_SOURCE {
        return Err(EmitError::SourceOverflow);
    }
    Ok(MslShader { entry_name: entry_name, source: out })
}

/// Generate the vertex function for a parsed program.
pub fn emit_vs(program: &Program, bytecode_hash: u32) -> Result<MslShader, EmitError> {
    if program.shader_type != ShaderType::Vertex {
        return Err(EmitError::WrongStage);
    }

    let entry_name = format!("vs_{:08x}", bytecode_hash);
    let mut out = String::new();

    out.push_str("#include <metal_stdlib>\n");
    out.push_str("using namespace metal;\n\n");

    // Input attributes: one field per input dcl, named after the register
    // so instruction text needs no renaming.
    let _ = writeln!(out, "struct VS_In_{:08x} {{", bytecode_hash);
    for dcl in program.dcls.iter() {
        if dcl.reg_type as u16 != reg::INPUT {
            continue;
        }
        let attr_index = match usage_to_attr_index(dcl.usage, dcl.usage_index) {
            Some(index) => index,
            None => continue,
        };
        let _ = writeln!(
            out,
            "  {} v{} [[attribute({})]];",
            float_type_for_mask(dcl.write_mask),
            dcl.reg_number,
            attr_index
        );
    }
    out.push_str("};\n\n");

    // Interpolants handed to the fragment stage.
    let _ = writeln!(out, "struct VS_Out_{:08x} {{", bytecode_hash);
    out.push_str("  float4 position [[position]];\n");

    if program.major_version >= 3 {
        let mut declared_outputs = 0u32;
        for dcl in program.dcls.iter() {
            if dcl.reg_type as u16 != reg::OUTPUT {
                continue;
            }
            declared_outputs |= 1 << dcl.reg_number;
            if dcl.usage == usage::POSITION && dcl.usage_index == 0 {
                continue;
            }
            let _ = writeln!(
                out,
                "  {} o{} [[user({}{})]];",
                float_type_for_mask(dcl.write_mask),
                dcl.reg_number,
                user_semantic(dcl.usage),
                dcl.usage_index
            );
        }
        // Outputs written without a dcl still need fields; link them as
        // texcoords by register index.
        for index in 0..32 {
            if program.output_mask & (1 << index) != 0 && declared_outputs & (1 << index) == 0 {
                let _ = writeln!(out, "  float4 o{} [[user(texcoord{})]];", index, index);
            }
        }
    } else {
        for index in 0..2 {
            if program.color_output_mask & (1 << index) != 0 {
                let _ = writeln!(out, "  float4 oD{} [[user(color{})]];", index, index);
            }
        }
        for index in 0..8 {
            if program.output_mask & (1 << index) != 0 {
                let _ = writeln!(out, "  float4 oT{} [[user(texcoord{})]];", index, index);
            }
        }
    }

    if program.writes_fog {
        out.push_str("  float fog;\n");
    }
    out.push_str("};\n\n");

    let _ = writeln!(out, "vertex VS_Out_{:08x} {}(", bytecode_hash, entry_name);
    let _ = writeln!(out, "    VS_In_{:08x} in [[stage_in]],", bytecode_hash);
    out.push_str("    constant float4 *c [[buffer(1)]]) {\n");

    emit_temporaries(&mut out, program);
    if uses_address_register(program) {
        out.push_str("  float4 a0 = float4(0.0);\n");
    }
    emit_local_defs(&mut out, program);

    let _ = writeln!(out, "  VS_Out_{:08x} out;", bytecode_hash);
    out.push_str("  out.position = float4(0.0);\n\n");

    for instruction in program.instructions.iter() {
        emit_instruction(&mut out, instruction, true, program.major_version);
    }

    out.push_str("\n  return out;\n}\n");
    finish(out, entry_name)
}

/// Generate the fragment function for a parsed program.
pub fn emit_ps(program: &Program, bytecode_hash: u32) -> Result<MslShader, EmitError> {
    if program.shader_type != ShaderType::Pixel {
        return Err(EmitError::WrongStage);
    }

    let entry_name = format!("ps_{:08x}", bytecode_hash);
    let mut out = String::new();

    out.push_str("#include <metal_stdlib>\n");
    out.push_str("using namespace metal;\n\n");

    let _ = writeln!(out, "struct PS_In_{:08x} {{", bytecode_hash);
    out.push_str("  float4 position [[position]];\n");

    // SM 3.0 interpolant inputs.
    for dcl in program.dcls.iter() {
        if dcl.reg_type as u16 != reg::INPUT {
            continue;
        }
        let _ = writeln!(
            out,
            "  {} v{} [[user({}{})]];",
            float_type_for_mask(dcl.write_mask),
            dcl.reg_number,
            user_semantic(dcl.usage),
            dcl.usage_index
        );
    }

    // SM < 3.0 texcoord inputs arrive through the t# register file.
    for dcl in program.dcls.iter() {
        if dcl.reg_type as u16 != reg::ADDR {
            continue;
        }
        let _ = writeln!(
            out,
            "  float4 t{} [[user(texcoord{})]];",
            dcl.reg_number, dcl.reg_number
        );
    }

    for dcl in program.dcls.iter() {
        if dcl.reg_type as u16 == reg::MISCTYPE && dcl.reg_number == 0 {
            out.push_str("  // vPos mapped to position\n");
        }
    }
    out.push_str("};\n\n");

    let _ = write!(out, "fragment float4 {}(", entry_name);
    let _ = write!(out, "\n    PS_In_{:08x} in [[stage_in]]", bytecode_hash);

    for dcl in program.dcls.iter() {
        if dcl.reg_type as u16 != reg::SAMPLER {
            continue;
        }
        let texture_type = match dcl.sampler_type {
            super::sampler_type::CUBE => "texturecube<float>",
            super::sampler_type::VOLUME => "texture3d<float>",
            _ => "texture2d<float>",
        };
        let _ = write!(
            out,
            ",\n    {} tex{} [[texture({})]]",
            texture_type, dcl.reg_number, dcl.reg_number
        );
        let _ = write!(
            out,
            ",\n    sampler samp{} [[sampler({})]]",
            dcl.reg_number, dcl.reg_number
        );
    }

    out.push_str(",\n    constant float4 *c [[buffer(0)]]) {\n");

    emit_temporaries(&mut out, program);

    for index in 0..program.num_color_outputs.max(1) {
        let _ = writeln!(out, "  float4 oC{} = float4(0.0);", index);
    }
    if program.writes_depth {
        out.push_str("  float oDepth = 0.0;\n");
    }
    emit_local_defs(&mut out, program);
    out.push_str("\n");

    for instruction in program.instructions.iter() {
        emit_instruction(&mut out, instruction, false, program.major_version);
    }

    out.push_str("\n  return oC0;\n}\n");
    finish(out, entry_name)
}

#[cfg(test)]
mod tests {
    use super::super::{bytecode_hash, op, parse, reg, usage};
    use super::{emit_ps, emit_vs, EmitError};

    const END: u32 = 0x0000_FFFF;

    fn src_token(reg_type: u16, number: u16) -> u32 {
        0x8000_0000
            | (((reg_type as u32) & 0x7) << 28)
            | ((((reg_type as u32) >> 3) & 0x3) << 11)
            | 0x00E4_0000
            | number as u32
    }

    fn dst_token(reg_type: u16, number: u16) -> u32 {
        0x8000_0000
            | (((reg_type as u32) & 0x7) << 28)
            | ((((reg_type as u32) >> 3) & 0x3) << 11)
            | 0x000F_0000
            | number as u32
    }

    fn dcl_tokens(usage_value: u8, usage_index: u8, reg_type: u16, number: u16) -> [u32; 3] {
        [
            op::DCL as u32,
            0x8000_0000 | usage_value as u32 | ((usage_index as u32) << 16),
            dst_token(reg_type, number),
        ]
    }

    /// vs_3_0: dcl_position v0, dcl_texcoord0 v1, m4x4 oPos v0 c0,
    /// mov o0 v1, end.
    fn sample_vs_bytecode() -> Vec<u32> {
        let mut code = vec![0xFFFE_0300u32];
        code.extend_from_slice(&dcl_tokens(usage::POSITION, 0, reg::INPUT, 0));
        code.extend_from_slice(&dcl_tokens(usage::TEXCOORD, 0, reg::INPUT, 1));
        code.push(op::M4X4 as u32);
        code.push(dst_token(reg::RASTOUT, 0));
        code.push(src_token(reg::INPUT, 0));
        code.push(src_token(reg::CONST, 0));
        code.push(op::MOV as u32);
        code.push(dst_token(reg::OUTPUT, 0));
        code.push(src_token(reg::INPUT, 1));
        code.push(END);
        code
    }

    #[test]
    fn vertex_shader_emits_named_entry_and_io_structs() {
        let code = sample_vs_bytecode();
        let program = parse::parse(&code).unwrap();
        assert_eq!(program.instructions.len(), 2);
        assert_eq!(program.dcls.len(), 2);

        let hash = bytecode_hash(&code);
        let shader = emit_vs(&program, hash).unwrap();

        assert_eq!(shader.entry_name, format!("vs_{:08x}", hash));
        assert!(shader.source.contains("float4 position [[position]];"));
        assert!(shader.source.contains("[[user(texcoord0)]]"));
        assert!(shader.source.contains("v0 [[attribute(0)]]"));
        assert!(shader.source.contains("v1 [[attribute(2)]]"));
        assert!(shader.source.contains("constant float4 *c [[buffer(1)]]"));
        assert!(shader.source.contains("// m4x4"));
        assert!(shader.source.contains("out.o0 = in.v1;"));
        assert!(shader.source.contains(&format!("vertex VS_Out_{:08x} vs_{:08x}(", hash, hash)));
    }

    #[test]
    fn entry_names_are_stable_across_emissions() {
        let code = sample_vs_bytecode();
        let program = parse::parse(&code).unwrap();
        let hash = bytecode_hash(&code);
        let first = emit_vs(&program, hash).unwrap();
        let second = emit_vs(&program, hash).unwrap();
        assert_eq!(first.entry_name, second.entry_name);
        assert_eq!(first.source, second.source);
    }

    #[test]
    fn stage_mismatch_is_refused() {
        let code = sample_vs_bytecode();
        let program = parse::parse(&code).unwrap();
        assert_eq!(emit_ps(&program, 1).err(), Some(EmitError::WrongStage));
    }

    #[test]
    fn pixel_shader_binds_textures_and_returns_color() {
        // ps_3_0: dcl_texcoord0 v0, dcl_2d s0, texld r0 v0 s0, mov oC0 r0.
        let mut code = vec![0xFFFF_0300u32];
        code.extend_from_slice(&dcl_tokens(usage::TEXCOORD, 0, reg::INPUT, 0));
        code.push(op::DCL as u32);
        code.push(0x8000_0000 | ((super::super::sampler_type::TWO_D as u32) << 27));
        code.push(dst_token(reg::SAMPLER, 0));
        code.push(op::TEXLD as u32);
        code.push(dst_token(reg::TEMP, 0));
        code.push(src_token(reg::INPUT, 0));
        code.push(src_token(reg::SAMPLER, 0));
        code.push(op::MOV as u32);
        code.push(dst_token(reg::COLOROUT, 0));
        code.push(src_token(reg::TEMP, 0));
        code.push(END);

        let program = parse::parse(&code).unwrap();
        let hash = bytecode_hash(&code);
        let shader = emit_ps(&program, hash).unwrap();

        assert_eq!(shader.entry_name, format!("ps_{:08x}", hash));
        assert!(shader.source.contains("texture2d<float> tex0 [[texture(0)]]"));
        assert!(shader.source.contains("sampler samp0 [[sampler(0)]]"));
        assert!(shader.source.contains("constant float4 *c [[buffer(0)]]"));
        assert!(shader.source.contains("r0 = tex0.sample(samp0, in.v0.xy);"));
        assert!(shader.source.contains("oC0 = r0;"));
        assert!(shader.source.contains("return oC0;"));
    }

    #[test]
    fn scalar_results_broadcast_to_the_write_mask() {
        // dp4 r0(full mask) then dp3 r1.x (single component).
        let full = [
            0xFFFE_0300,
            op::DP4 as u32,
            dst_token(reg::TEMP, 0),
            src_token(reg::INPUT, 0),
            src_token(reg::CONST, 0),
            END,
        ];
        let program = parse::parse(&full).unwrap();
        let shader = emit_vs(&program, 1).unwrap();
        assert!(shader.source.contains("r0 = float4(dot(in.v0, c[0]));"));

        let masked = [
            0xFFFE_0300,
            op::DP3 as u32,
            0x8000_0000 | ((reg::TEMP as u32) << 28) | (0x1 << 16) | 1,
            src_token(reg::INPUT, 0),
            src_token(reg::CONST, 0),
            END,
        ];
        let program = parse::parse(&masked).unwrap();
        let shader = emit_vs(&program, 1).unwrap();
        assert!(shader.source.contains("r1.x = dot(in.v0.xyz, c[0].xyz);"));
    }

    #[test]
    fn saturate_modifier_wraps_the_assignment() {
        // mov_sat r0, c0 (result modifier bit 20).
        let dst_sat = 0x8000_0000
            | ((reg::TEMP as u32) << 28)
            | (0xF << 16)
            | (1 << 20);
        let code = [
            0xFFFE_0300,
            op::MOV as u32,
            dst_sat,
            src_token(reg::CONST, 2),
            END,
        ];
        let program = parse::parse(&code).unwrap();
        let shader = emit_vs(&program, 1).unwrap();
        assert!(shader.source.contains("r0 = saturate(c[2]);"));
    }

    #[test]
    fn source_modifiers_render_as_expressions() {
        // add r0, -c0, c1 (negate on source 0).
        let negated = src_token(reg::CONST, 0) | (1 << 24);
        let code = [
            0xFFFE_0300,
            op::ADD as u32,
            dst_token(reg::TEMP, 0),
            negated,
            src_token(reg::CONST, 1),
            END,
        ];
        let program = parse::parse(&code).unwrap();
        let shader = emit_vs(&program, 1).unwrap();
        assert!(shader.source.contains("r0 = (-c[0]) + c[1];"));
    }

    #[test]
    fn flow_control_lowers_to_braces() {
        let ifc_token = op::IFC as u32 | ((super::super::cmp::LT as u32) << 18);
        let code = [
            0xFFFF_0300,
            ifc_token,
            src_token(reg::TEMP, 0),
            src_token(reg::TEMP, 1),
            op::ELSE as u32,
            op::ENDIF as u32,
            END,
        ];
        let program = parse::parse(&code).unwrap();
        let shader = emit_ps(&program, 1).unwrap();
        assert!(shader.source.contains("if (r0.x < r1.x) {"));
        assert!(shader.source.contains("} else {"));
    }

    #[test]
    fn texkill_discards_on_negative_components() {
        let code = [
            0xFFFF_0300,
            op::TEXKILL as u32,
            dst_token(reg::TEMP, 2),
            END,
        ];
        let program = parse::parse(&code).unwrap();
        let shader = emit_ps(&program, 1).unwrap();
        assert!(shader
            .source
            .contains("if (any(r2.xyz < float3(0.0))) discard_fragment();"));
    }
}
