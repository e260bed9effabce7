use indoc::indoc;
use pretty_assertions::assert_eq;
use rsov_linker::fixups::UNDEF_LANE_SENTINEL;
use rsov_linker::fuse::fuse_types_and_constants;
use rsov_linker::{BlockKind, LinkError, LinkOptions, Linker, LinkerModule};
use std::fs;

const WRAPPER: &str = indoc! {r#"
    ; SPIR-V
    ; Version: 1.0
    ; Generator: rs2spirv;
    ; Bound: 1024
    ; Schema: 0
    OpCapability Shader
    OpCapability StorageImageWriteWithoutFormat
    OpCapability Addresses
    %glsl_ext_ins = OpExtInstImport "GLSL.std.450"
    OpMemoryModel Physical32 GLSL450
    OpEntryPoint GLCompute %main "main" %global_invocation_id
    OpExecutionMode %main LocalSize 1 1 1
    OpSource GLSL 450
    %RS_KERNELS = OpString "%invert "

    OpDecorate %global_invocation_id BuiltIn GlobalInvocationId
    OpDecorate %input_image DescriptorSet 0
    OpDecorate %input_image Binding 0
    OpDecorate %input_image NonWritable
    OpDecorate %output_image DescriptorSet 0
    OpDecorate %output_image Binding 1
    OpDecorate %output_image NonReadable


    %void = OpTypeVoid
    %fun_void = OpTypeFunction %void
    %float = OpTypeFloat 32
    %v4float = OpTypeVector %float 4
    %uchar = OpTypeInt 8 0
    %v4uchar = OpTypeVector %uchar 4
    %uint = OpTypeInt 32 0
    %v2uint = OpTypeVector %uint 2
    %v3uint = OpTypeVector %uint 3
    %v4uint = OpTypeVector %uint 4
    %int = OpTypeInt 32 1
    %v2int = OpTypeVector %int 2
    %fun_f4_uc4 = OpTypeFunction %v4float %v4uchar
    %fun_uc4_f4 = OpTypeFunction %v4uchar %v4float

    %kernel_function_ty = OpTypeFunction %v4uchar %v4uchar
    %ptr_function_ty = OpTypePointer Function %v4uchar
    %ptr_function_access_ty = OpTypePointer Function %v4uint

    %input_image_ty = OpTypeImage %uint 2D 0 0 0 2 Rgba8ui
    %input_image_ptr_ty = OpTypePointer UniformConstant %input_image_ty
    %input_image = OpVariable %input_image_ptr_ty UniformConstant

    %global_input_ptr_ty = OpTypePointer Input %v3uint
    %global_invocation_id = OpVariable %global_input_ptr_ty Input
    %output_image_ty = OpTypeImage %uint 2D 0 0 0 2 Rgba8ui
    %output_image_ptr_ty = OpTypePointer UniformConstant %output_image_ty
    %output_image = OpVariable %output_image_ptr_ty UniformConstant

    %uint_zero = OpConstant %uint 0
    %float_zero = OpConstant %float 0

    %rs_linker__Z14convert_float4Dv4_h = OpFunction %v4float Pure %fun_f4_uc4
    %param_Z14convert_float4Dv4_h = OpFunctionParameter %v4uchar
    %label_Z14convert_float4Dv4_h = OpLabel
    %res_Z14convert_float4Dv4_h = OpConvertUToF %v4float %param_Z14convert_float4Dv4_h
    OpReturnValue %res_Z14convert_float4Dv4_h
    OpFunctionEnd

    %rs_linker__Z14convert_uchar4Dv4_f = OpFunction %v4uchar Pure %fun_uc4_f4
    %param_Z14convert_uchar4Dv4_f = OpFunctionParameter %v4float
    %label_Z14convert_uchar4Dv4_f = OpLabel
    %res_Z14convert_uchar4Dv4_f = OpConvertFToU %v4uchar %param_Z14convert_uchar4Dv4_f
    OpReturnValue %res_Z14convert_uchar4Dv4_f
    OpFunctionEnd

    %main = OpFunction %void None %fun_void
    %lablel_main = OpLabel
    %input_pixel = OpVariable %ptr_function_access_ty Function
    %res = OpVariable %ptr_function_ty Function
    %image_load = OpLoad %input_image_ty %input_image
    %coords_load = OpLoad %v3uint %global_invocation_id
    %coords_x = OpCompositeExtract %uint %coords_load 0
    %coords_y = OpCompositeExtract %uint %coords_load 1
    %coords_z = OpCompositeExtract %uint %coords_load 2
    %shuffled = OpVectorShuffle %v2uint %coords_load %coords_load 0 1
    %bitcasted = OpBitcast %v2int %shuffled
    %image_read = OpImageRead %v4uint %image_load %bitcasted
    OpStore %input_pixel %image_read
    %input_load = OpLoad %v4uchar %input_pixel
    %kernel_call = OpFunctionCall %v4uchar %RS_SPIRV_DUMMY_ %input_load
    OpStore %res %kernel_call
    %output_load = OpLoad %output_image_ty %output_image
    %res_load = OpLoad %v4uchar %res
    OpImageWrite %output_load %bitcasted %res_load
    OpReturn
    OpFunctionEnd
    %RS_SPIRV_DUMMY_ = OpFunction %v4uchar None %kernel_function_ty
    %p = OpFunctionParameter %v4uchar
    %11 = OpLabel
    OpReturnValue %p
    OpFunctionEnd
"#};

const KERNEL: &str = indoc! {r#"
    ; SPIR-V
    ; Version: 1.0
    ; Generator: Khronos LLVM/SPIR-V Translator; 14
    ; Bound: 24
    ; Schema: 0
    OpCapability Addresses
    OpCapability Linkage
    OpCapability Kernel
    OpCapability Int8
    %1 = OpExtInstImport "OpenCL.std"
    OpMemoryModel Physical32 OpenCL
    OpSource OpenCL_C 102000
    OpName %invert "invert"
    OpName %in "in"
    OpDecorate %invert LinkageAttributes "invert" Export
    OpDecorate %_Z14convert_float4Dv4_h LinkageAttributes "_Z14convert_float4Dv4_h" Import
    OpDecorate %_Z14convert_uchar4Dv4_f LinkageAttributes "_Z14convert_uchar4Dv4_f" Import
    %uchar = OpTypeInt 8 0
    %float = OpTypeFloat 32
    %v4uchar = OpTypeVector %uchar 4
    %v4float = OpTypeVector %float 4
    %8 = OpTypeFunction %v4uchar %v4uchar
    %12 = OpTypeFunction %v4float %v4uchar
    %16 = OpTypeFunction %v4uchar %v4float
    %float_255 = OpConstant %float 255
    %19 = OpConstantComposite %v4float %float_255 %float_255 %float_255 %float_255

    %_Z14convert_float4Dv4_h = OpFunction %v4float None %12
    %13 = OpFunctionParameter %v4uchar
    OpFunctionEnd

    %_Z14convert_uchar4Dv4_f = OpFunction %v4uchar None %16
    %17 = OpFunctionParameter %v4float
    OpFunctionEnd

    %invert = OpFunction %v4uchar None %8
    %in = OpFunctionParameter %v4uchar
    %entry = OpLabel
    %call = OpFunctionCall %v4float %_Z14convert_float4Dv4_h %in
    %sub = OpFSub %v4float %19 %call
    %call1 = OpFunctionCall %v4uchar %_Z14convert_uchar4Dv4_f %sub
    OpReturnValue %call1
    OpFunctionEnd
"#};

fn linker() -> Linker {
    Linker::new(LinkOptions::default())
}

fn main_lines(module: &LinkerModule) -> Vec<String> {
    module
        .main_function()
        .unwrap()
        .lines()
        .iter()
        .map(|l| l.as_str().to_string())
        .collect()
}

#[test]
fn test_link_invert_kernel() {
    let (module, stats) = linker().link_sources(KERNEL, WRAPPER).unwrap();

    assert_eq!(stats.kernel, "%rs_linker_invert");
    assert_eq!(stats.inlined_calls, 3);
    // Both runtime conversions, the placeholder and the kernel itself
    assert_eq!(stats.removed_functions, 4);
    // Seven kernel duplicates plus the output image types, which repeat the input image types
    assert_eq!(stats.fused_definitions, 9);

    let kinds: Vec<BlockKind> = module.blocks().iter().map(|b| b.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            BlockKind::Header,
            BlockKind::Decorations,
            BlockKind::TypesAndConstants,
            BlockKind::TypesAndConstants,
            BlockKind::Variables,
            BlockKind::MainFunction,
        ]
    );

    let main = main_lines(&module);
    let start = main
        .iter()
        .position(|l| l == "%input_load = OpLoad %v4uchar %input_pixel")
        .unwrap();
    assert_eq!(
        &main[start + 1..start + 5],
        &[
            "%res_Z14convert_float4Dv4_h = OpConvertUToF %v4float %input_load",
            "%rs_linker_sub = OpFSub %v4float %rs_linker_19 %res_Z14convert_float4Dv4_h",
            "%res_Z14convert_uchar4Dv4_f = OpConvertFToU %v4uchar %rs_linker_sub",
            "OpStore %res %res_Z14convert_uchar4Dv4_f",
        ]
    );

    let text = module.to_text(false);
    assert!(!text.contains("OpFunctionCall"));
    assert!(!text.contains("RS_SPIRV_DUMMY_"));
    assert!(!text.contains("LinkageAttributes"));
    assert!(!text.contains("OpCapability Kernel"));
    assert_eq!(text.matches("OpTypeInt 8 0").count(), 1);
    assert!(text.contains("%rs_linker_19 = OpConstantComposite %v4float %rs_linker_float_255"));
    assert_eq!(stats.lines, module.line_count());
}

#[test]
fn test_linked_output_is_stable_under_fusion() {
    let (mut module, _) = linker().link_sources(KERNEL, WRAPPER).unwrap();
    let before = module.to_text(false);
    assert_eq!(fuse_types_and_constants(&mut module), 0);
    assert_eq!(module.to_text(false), before);
}

#[test]
fn test_instruction_fixups_reach_inlined_kernel_code() {
    let kernel = KERNEL
        .replace(
            "%float_255 = OpConstant %float 255",
            "%float_255 = OpConstant %float 255\n%_ptr_Function_v4float = OpTypePointer Function %v4float",
        )
        .replace(
            "%sub = OpFSub %v4float %19 %call",
            "%sub = OpFSub %v4float %19 %call\n\
             %elem = OpInBoundsPtrAccessChain %_ptr_Function_v4float %arr %long_0 %long_1\n\
             %swz = OpVectorShuffle %v4float %sub %sub 3 2 1 4294967295",
        );

    let (module, stats) = linker().link_sources(&kernel, WRAPPER).unwrap();
    assert_eq!(stats.access_chain_rewrites, 1);
    assert_eq!(
        stats.shuffle_lane_rewrites,
        kernel.matches(UNDEF_LANE_SENTINEL).count()
    );
    assert!(stats.storage_class_rewrites >= 2);

    let main = main_lines(&module);
    assert!(main.contains(
        &"%rs_linker_elem = OpAccessChain %rs_linker__ptr_Uniform_v4float %rs_linker_arr %rs_linker_long_1"
            .to_string()
    ));
    assert!(main.contains(
        &"%rs_linker_swz = OpVectorShuffle %v4float %rs_linker_sub %rs_linker_sub 3 2 1 0".to_string()
    ));

    let text = module.to_text(false);
    assert!(!text.contains(UNDEF_LANE_SENTINEL));
    assert!(text.contains("%rs_linker__ptr_Uniform_v4float = OpTypePointer Uniform %v4float"));
    // Wrapper code keeps its own storage classes.
    assert!(text.contains("%res = OpVariable %ptr_function_ty Function"));
}

#[test]
fn test_malformed_access_chain_fails_link() {
    let kernel = KERNEL.replace(
        "%sub = OpFSub %v4float %19 %call",
        "%sub = OpFSub %v4float %19 %call\n%elem = OpInBoundsPtrAccessChain %ptr %arr %long_0",
    );
    let err = linker().link_sources(&kernel, WRAPPER).unwrap_err();
    assert!(matches!(err, LinkError::MalformedInstruction { .. }));
}

#[test]
fn test_wrapper_must_name_exactly_one_kernel() {
    let two = WRAPPER.replace(r#""%invert ""#, r#""%invert %blur ""#);
    assert!(matches!(
        linker().link_sources(KERNEL, &two),
        Err(LinkError::UnsupportedKernelCount(2))
    ));

    let none = WRAPPER.replace(r#""%invert ""#, r#""""#);
    assert!(matches!(
        linker().link_sources(KERNEL, &none),
        Err(LinkError::UnsupportedKernelCount(0))
    ));
}

#[test]
fn test_unknown_kernel_name_is_unresolved() {
    let wrapper = WRAPPER.replace(r#""%invert ""#, r#""%blur ""#);
    match linker().link_sources(KERNEL, &wrapper) {
        Err(LinkError::UnresolvedCallee { name, candidates }) => {
            assert_eq!(name, "%rs_linker_blur");
            assert_eq!(candidates, 0);
        }
        other => panic!("expected an unresolved callee, got {:?}", other),
    }
}

#[test]
fn test_wrapper_without_placeholder_call_fails() {
    let wrapper = WRAPPER.replace(
        "%kernel_call = OpFunctionCall %v4uchar %RS_SPIRV_DUMMY_ %input_load",
        "%kernel_call = OpFunctionCall %v4uchar %rs_linker__Z14convert_uchar4Dv4_f %input_load",
    );
    assert!(matches!(
        linker().link_sources(KERNEL, &wrapper),
        Err(LinkError::PlaceholderNotFound { callee }) if callee == "%RS_SPIRV_DUMMY_"
    ));
}

#[test]
fn test_duplicate_main_is_rejected() {
    let wrapper = format!(
        "{}{}",
        WRAPPER,
        indoc! {"
            %main = OpFunction %void None %fun_void
            %l2 = OpLabel
            OpReturn
            OpFunctionEnd
        "}
    );
    assert!(matches!(
        linker().link_sources(KERNEL, &wrapper),
        Err(LinkError::DuplicateMainFunction)
    ));
}

#[test]
fn test_arity_mismatch_at_placeholder_call() {
    let wrapper = WRAPPER.replace(
        "%RS_SPIRV_DUMMY_ %input_load\n",
        "%RS_SPIRV_DUMMY_ %input_load %coords_x\n",
    );
    match linker().link_sources(KERNEL, &wrapper) {
        Err(LinkError::ArityMismatch {
            callee,
            caller_args,
            callee_params,
        }) => {
            assert_eq!(callee, "%rs_linker_invert");
            assert_eq!((caller_args, callee_params), (2, 1));
        }
        other => panic!("expected an arity mismatch, got {:?}", other),
    }
}

#[test]
fn test_indirect_kernel_recursion_is_rejected() {
    let kernel = KERNEL
        .replace(
            "%call1 = OpFunctionCall %v4uchar %_Z14convert_uchar4Dv4_f %sub",
            "%call1 = OpFunctionCall %v4uchar %bounce %sub",
        )
        + indoc! {"
            %bounce = OpFunction %v4uchar None %16
            %v = OpFunctionParameter %v4float
            %lb = OpLabel
            %conv = OpConvertFToU %v4uchar %v
            %again = OpFunctionCall %v4uchar %invert %conv
            OpReturnValue %again
            OpFunctionEnd
        "};

    match linker().link_sources(&kernel, WRAPPER) {
        Err(LinkError::RecursiveCallChain { chain }) => {
            assert_eq!(
                chain,
                vec!["%rs_linker_invert", "%rs_linker_bounce", "%rs_linker_invert"]
            );
        }
        other => panic!("expected a recursive call chain, got {:?}", other),
    }
}

#[test]
fn test_link_files_writes_annotated_output() {
    let dir = tempfile::tempdir().unwrap();
    let kernel_path = dir.path().join("invert.spt");
    let wrapper_path = dir.path().join("wrapper.spt");
    let output_path = dir.path().join("wrapper.linked.spt");
    fs::write(&kernel_path, KERNEL).unwrap();
    fs::write(&wrapper_path, WRAPPER).unwrap();

    let stats = linker()
        .link_files(&kernel_path, &wrapper_path, &output_path)
        .unwrap();
    assert_eq!(stats.kernel, "%rs_linker_invert");

    let output = fs::read_to_string(&output_path).unwrap();
    assert!(output.starts_with("; SPIR-V\n"));
    assert!(output.contains("\n\n; MainFun\n\n\t%main = OpFunction %void None %fun_void\n"));
    assert!(output.contains("\t%rs_linker_sub = OpFSub %v4float %rs_linker_19 %res_Z14convert_float4Dv4_h\n"));

    let reparsed = LinkerModule::parse(&output).unwrap();
    assert!(!reparsed.main_function().unwrap().has_function_calls());
}

#[test]
fn test_link_files_reports_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.spt");
    let wrapper_path = dir.path().join("wrapper.spt");
    fs::write(&wrapper_path, WRAPPER).unwrap();

    let err = linker()
        .link_files(&missing, &wrapper_path, &dir.path().join("out.spt"))
        .unwrap_err();
    assert!(matches!(err, LinkError::Io { .. }));
    assert!(!dir.path().join("out.spt").exists());
}

#[test]
fn test_options_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("linker.json");
    fs::write(&config, r#"{ "annotate_blocks": false }"#).unwrap();

    let options = LinkOptions::load(&config).unwrap();
    assert!(!options.annotate_blocks);
    assert_eq!(options.kernel_prefix, "rs_linker_");

    fs::write(&config, r#"{ "kernel_prefix": "" }"#).unwrap();
    assert!(matches!(LinkOptions::load(&config), Err(LinkError::Config(_))));
}

#[test]
fn test_link_convenience() {
    let text = rsov_linker::link(KERNEL, WRAPPER).unwrap();
    assert!(text.contains("; TypeAndConst"));
    assert!(!text.contains("OpFunctionCall"));
}
