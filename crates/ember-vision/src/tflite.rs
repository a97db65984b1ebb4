use anyhow::Result;
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::info;

use crate::camera::Frame;
use crate::letterbox::letterbox;
use crate::{nms_filter, postprocess, Detection, Detector, VisionConfig, VisionError};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;

#[link(name = "tensorflowlite_c")]
extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

pub struct TfliteDetector {
    cfg: VisionConfig,
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
}

unsafe impl Send for TfliteDetector {}

impl TfliteDetector {
    pub fn new(cfg: VisionConfig) -> Result<Self> {
        let cpath = CString::new(cfg.model_path.as_str())?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", cfg.model_path);

        let opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!opts.is_null(), "failed to create tflite options");
        unsafe { TfLiteInterpreterOptionsSetNumThreads(opts, 2); } // conservative

        let interp = unsafe { TfLiteInterpreterCreate(model, opts) };
        anyhow::ensure!(!interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        info!("vision: loaded TFLite model: {}", cfg.model_path);

        Ok(Self { cfg, model, opts, interp })
    }

    pub fn inspect(&mut self) -> Result<String> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let in_dims = tensor_dims(input);
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };

        let out0 = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!out0.is_null(), "no output tensor 0");
        let out_dims = tensor_dims(out0);
        let out_bytes = unsafe { TfLiteTensorByteSize(out0) };

        Ok(format!(
            "TFLite inspect:\n- input[0] dims={:?} bytes={}\n- output[0] dims={:?} bytes={}\n",
            in_dims, in_bytes, out_dims, out_bytes
        ))
    }

    fn run(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (square, lb) = letterbox(frame, self.cfg.input_size)?;

        // normalized f32 CHW, matching the model's training input
        let s = self.cfg.input_size as usize;
        let plane = s * s;
        let mut chw = vec![0f32; 3 * plane];
        let raw = square.as_raw();
        for i in 0..plane {
            chw[i] = raw[i * 3] as f32 / 255.0;
            chw[plane + i] = raw[i * 3 + 1] as f32 / 255.0;
            chw[2 * plane + i] = raw[i * 3 + 2] as f32 / 255.0;
        }

        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");

        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) as *mut f32 };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");

        let need = chw.len() * std::mem::size_of::<f32>();
        anyhow::ensure!(in_bytes >= need, "input tensor too small: {} < {}", in_bytes, need);
        unsafe { ptr::copy_nonoverlapping(chw.as_ptr(), in_ptr, chw.len()); }

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let out = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, 0) };
        anyhow::ensure!(!out.is_null(), "no output tensor 0");

        let out_dims = tensor_dims(out);
        let expected_stride = 4 + self.cfg.num_classes;
        let (stride, num_preds) = match out_dims.as_slice() {
            [1, s, n] => (*s as usize, *n as usize),
            [s, n] => (*s as usize, *n as usize),
            other => {
                return Err(VisionError::BadOutput(format!(
                    "unexpected output dims {:?}; run `ember vision inspect`",
                    other
                ))
                .into())
            }
        };
        if stride != expected_stride {
            return Err(VisionError::BadOutput(format!(
                "stride {} != 4 + {} classes (dims {:?})",
                stride, self.cfg.num_classes, out_dims
            ))
            .into());
        }

        let out_ptr = unsafe { TfLiteTensorData(out) as *const f32 };
        anyhow::ensure!(!out_ptr.is_null(), "null output tensor data");
        let out_bytes = unsafe { TfLiteTensorByteSize(out) };
        let out_len = out_bytes / std::mem::size_of::<f32>();
        let raw_out = unsafe { std::slice::from_raw_parts(out_ptr, out_len) };

        let dets = postprocess(raw_out, num_preds, self.cfg.num_classes, self.cfg.conf_threshold, &lb);
        Ok(nms_filter(dets, self.cfg.iou_threshold, self.cfg.max_detections))
    }
}

impl Detector for TfliteDetector {
    fn input_size(&self) -> u32 {
        self.cfg.input_size
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.run(frame)
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd as usize);
        for i in 0..nd {
            v.push(TfLiteTensorDim(t, i));
        }
        v
    }
}

impl Drop for TfliteDetector {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
    }
}
