//! OpenCV ORB matcher and RANSAC homography.

use image::GrayImage;
use nalgebra::Matrix3;
use opencv::core::{self, DMatch, KeyPoint, Mat, Point2f, Scalar, Vector, CV_8UC1};
use opencv::prelude::*;
use opencv::{calib3d, features2d};
use tracing::debug;

use super::{FeatureMatcher, FeatureMatches, GeometryDegenerate, Homography, HomographySolver, PointMatch};

fn to_mat(image: &GrayImage) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        CV_8UC1,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(mat)
}

/// ORB keypoints with cross-checked brute-force Hamming matching.
#[derive(Debug, Clone)]
pub struct OrbMatcher {
    pub max_features: i32,
}

impl Default for OrbMatcher {
    fn default() -> Self {
        Self { max_features: 1000 }
    }
}

impl OrbMatcher {
    fn try_match(&self, a: &GrayImage, b: &GrayImage) -> opencv::Result<FeatureMatches> {
        let mut orb = features2d::ORB::create(
            self.max_features,
            1.2,
            8,
            31,
            0,
            2,
            features2d::ORB_ScoreType::HARRIS_SCORE,
            31,
            20,
        )?;

        let (mat_a, mat_b) = (to_mat(a)?, to_mat(b)?);
        let mut kps_a = Vector::<KeyPoint>::new();
        let mut kps_b = Vector::<KeyPoint>::new();
        let mut desc_a = Mat::default();
        let mut desc_b = Mat::default();
        orb.detect_and_compute(&mat_a, &core::no_array(), &mut kps_a, &mut desc_a, false)?;
        orb.detect_and_compute(&mat_b, &core::no_array(), &mut kps_b, &mut desc_b, false)?;

        let mut result = FeatureMatches {
            keypoints_a: kps_a.len(),
            keypoints_b: kps_b.len(),
            matches: Vec::new(),
        };
        if kps_a.is_empty() || kps_b.is_empty() {
            return Ok(result);
        }

        let matcher = features2d::BFMatcher::create(core::NORM_HAMMING, true)?;
        let mut matches = Vector::<DMatch>::new();
        matcher.train_match(&desc_a, &desc_b, &mut matches, &core::no_array())?;

        for m in matches.iter() {
            let pa = kps_a.get(m.query_idx as usize)?.pt();
            let pb = kps_b.get(m.train_idx as usize)?.pt();
            result.matches.push(PointMatch {
                a: (pa.x as f64, pa.y as f64),
                b: (pb.x as f64, pb.y as f64),
                distance: m.distance as f64,
            });
        }
        result.matches.sort_by(|x, y| x.distance.total_cmp(&y.distance));
        Ok(result)
    }
}

impl FeatureMatcher for OrbMatcher {
    fn name(&self) -> &'static str {
        "opencv-orb"
    }

    fn match_features(&self, a: &GrayImage, b: &GrayImage) -> FeatureMatches {
        self.try_match(a, b).unwrap_or_else(|e| {
            debug!(error = %e, "ORB matching failed");
            FeatureMatches::default()
        })
    }
}

/// `cv::findHomography` with RANSAC.
#[derive(Debug, Clone)]
pub struct OpenCvHomographySolver {
    pub reproj_threshold: f64,
}

impl Default for OpenCvHomographySolver {
    fn default() -> Self {
        Self { reproj_threshold: 5.0 }
    }
}

impl HomographySolver for OpenCvHomographySolver {
    fn name(&self) -> &'static str {
        "opencv-find-homography"
    }

    fn solve(&self, src: &[(f64, f64)], dst: &[(f64, f64)]) -> Result<Homography, GeometryDegenerate> {
        if src.len() < 4 || src.len() != dst.len() {
            return Err(GeometryDegenerate::InsufficientMatches {
                found: src.len().min(dst.len()),
                required: 4,
            });
        }
        let to_points = |pts: &[(f64, f64)]| -> Vector<Point2f> {
            pts.iter().map(|&(x, y)| Point2f::new(x as f32, y as f32)).collect()
        };
        let (src_pts, dst_pts) = (to_points(src), to_points(dst));

        let mut mask = Mat::default();
        let h = calib3d::find_homography(&src_pts, &dst_pts, &mut mask, calib3d::RANSAC, self.reproj_threshold)
            .map_err(|e| GeometryDegenerate::SolveFailed(e.to_string()))?;
        if h.empty() {
            return Err(GeometryDegenerate::SolveFailed("empty homography".into()));
        }

        let mut m = Matrix3::zeros();
        for r in 0..3 {
            for c in 0..3 {
                m[(r, c)] = *h
                    .at_2d::<f64>(r as i32, c as i32)
                    .map_err(|e| GeometryDegenerate::SolveFailed(e.to_string()))?;
            }
        }
        Ok(Homography(m))
    }
}
